//! Error taxonomy for the hermetic executor (`spec.md` §7).

#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error("failed to spawn {argv0}: {source}")]
    Spawn {
        argv0: String,
        #[source]
        source: std::io::Error,
    },
    #[error("process exited with status {0}")]
    NonZeroExit(i32),
    #[error("process was killed by signal {0}")]
    Signalled(i32),
    #[error("declared output path {0} overlaps a declared input path")]
    OverlappingOutput(String),
    #[error("declared output {0} was not produced")]
    MissingOutput(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum LimitExceededError {
    #[error("wall-clock timeout after {0:?}")]
    WallClock(std::time::Duration),
    #[error("cpu time limit exceeded ({0:?})")]
    CpuTime(std::time::Duration),
    #[error("peak memory limit exceeded ({0} bytes)")]
    Memory(u64),
    #[error("process count limit exceeded ({0})")]
    ProcessCount(u32),
}

#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("strict isolation requested but unavailable on this platform: {0}")]
    Unavailable(String),
    #[error("failed to enter sandbox: {0}")]
    SetupFailed(String),
}
