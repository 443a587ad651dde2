//! `ResilienceError` (`spec.md` §7).

#[derive(Debug, thiserror::Error)]
pub enum ResilienceError {
    #[error("circuit open for endpoint {0}")]
    Circuit(String),
    #[error("rate limited: {0}")]
    RateLimited(RateLimitedReason),
    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),
}

#[derive(Debug, thiserror::Error)]
pub enum RateLimitedReason {
    #[error("no tokens available")]
    NoTokens,
    #[error("cancelled while waiting for a token")]
    Cancelled,
}
