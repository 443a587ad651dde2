//! `EngineError` and the exit-code mapping (`spec.md` §6/§7).

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Graph(#[from] kiln_core::GraphError),
    #[error(transparent)]
    Cache(#[from] kiln_cache::CacheError),
    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// The process exit code a CLI front-end should return for an error
    /// that prevented a build from even starting (`spec.md` §6): `2` for
    /// configuration/graph errors, `3` for everything else.
    pub fn exit_code(&self) -> i32 {
        match self {
            EngineError::Graph(_) => 2,
            EngineError::Cache(_) | EngineError::Internal(_) => 3,
        }
    }
}
