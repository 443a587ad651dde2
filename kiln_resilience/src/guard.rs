//! `EndpointGuard`: the `execute(op)` wrapper combining a circuit
//! breaker and token bucket for one logical endpoint (`spec.md` §4.L).

use std::future::Future;
use std::time::Duration;

use crate::circuit_breaker::CircuitBreaker;
use crate::error::{RateLimitedReason, ResilienceError};
use crate::token_bucket::{Priority, TokenBucket};

pub struct EndpointGuard {
    name: String,
    breaker: CircuitBreaker,
    bucket: TokenBucket,
}

impl EndpointGuard {
    pub fn new(
        name: impl Into<String>,
        failure_threshold: f64,
        window_size: usize,
        open_duration: Duration,
        bucket_capacity: u32,
        rate_per_sec: f64,
    ) -> Self {
        Self {
            name: name.into(),
            breaker: CircuitBreaker::new(failure_threshold, window_size, open_duration),
            bucket: TokenBucket::new(bucket_capacity, rate_per_sec),
        }
    }

    /// Runs `op` if the circuit is closed/half-open and a token is
    /// available (or `priority` is `Critical`), recording the outcome
    /// against the circuit breaker either way.
    pub async fn execute<F, Fut, T, E>(
        &self,
        priority: Priority,
        op: F,
    ) -> Result<T, ResilienceError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if !self.breaker.allow_request() {
            return Err(ResilienceError::Circuit(self.name.clone()));
        }
        if !self.bucket.try_acquire(priority) {
            return Err(ResilienceError::RateLimited(RateLimitedReason::NoTokens));
        }

        match op().await {
            Ok(value) => {
                self.breaker.record_success();
                Ok(value)
            }
            Err(_) => {
                self.breaker.record_failure();
                Err(ResilienceError::Circuit(self.name.clone()))
            }
        }
    }

    pub fn circuit_state(&self) -> crate::circuit_breaker::CircuitState {
        self.breaker.state()
    }
}
