//! `HandlerError` (`spec.md` §7).

#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("no handler registered for language tag {0:?}")]
    NoHandler(kiln_core::LanguageTag),
    #[error("handler rejected target {target}: {reason}")]
    InvalidTarget { target: String, reason: String },
    #[error(transparent)]
    Execution(#[from] kiln_execute::ExecuteOutcomeError),
    #[error(transparent)]
    Cache(#[from] kiln_cache::CacheError),
}
