//! `CancelledError` (`spec.md` §7).

#[derive(Debug, thiserror::Error)]
#[error("build cancelled")]
pub struct CancelledError;
