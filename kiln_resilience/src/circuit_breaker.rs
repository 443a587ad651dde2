//! Per-endpoint circuit breaker: Closed → Open → HalfOpen → Closed, with
//! a sliding-window failure rate and increasing backoff on repeated
//! trips (`spec.md` §4.L).

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

struct Window {
    outcomes: VecDeque<bool>,
    capacity: usize,
}

impl Window {
    fn new(capacity: usize) -> Self {
        Self {
            outcomes: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    fn record(&mut self, success: bool) {
        if self.outcomes.len() == self.capacity {
            self.outcomes.pop_front();
        }
        self.outcomes.push_back(success);
    }

    fn failure_rate(&self) -> f64 {
        if self.outcomes.is_empty() {
            return 0.0;
        }
        let failures = self.outcomes.iter().filter(|ok| !**ok).count();
        failures as f64 / self.outcomes.len() as f64
    }

    fn clear(&mut self) {
        self.outcomes.clear();
    }
}

struct Inner {
    state: CircuitState,
    window: Window,
    opened_at: Option<Instant>,
    open_duration: Duration,
    consecutive_successes_needed: u32,
    half_open_successes: u32,
    trip_count: u32,
}

/// `failure_threshold` is the sliding-window failure rate (0.0-1.0) at
/// which the breaker trips; `window_size` bounds how many recent
/// outcomes are considered.
pub struct CircuitBreaker {
    inner: Mutex<Inner>,
    failure_threshold: f64,
    base_open_duration: Duration,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: f64, window_size: usize, open_duration: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                window: Window::new(window_size),
                opened_at: None,
                open_duration,
                consecutive_successes_needed: 3,
                half_open_successes: 0,
                trip_count: 0,
            }),
            failure_threshold,
            base_open_duration: open_duration,
        }
    }

    /// Returns `true` if a request may proceed right now, transitioning
    /// `Open` → `HalfOpen` if the open-duration has elapsed.
    pub fn allow_request(&self) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let elapsed = inner.opened_at.map(|t| t.elapsed()).unwrap_or_default();
                if elapsed >= inner.open_duration {
                    inner.state = CircuitState::HalfOpen;
                    inner.half_open_successes = 0;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        inner.window.record(true);
        match inner.state {
            CircuitState::HalfOpen => {
                inner.half_open_successes += 1;
                if inner.half_open_successes >= inner.consecutive_successes_needed {
                    inner.state = CircuitState::Closed;
                    inner.window.clear();
                    inner.trip_count = 0;
                }
            }
            CircuitState::Closed | CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.window.record(false);
        match inner.state {
            CircuitState::HalfOpen => self.trip(&mut inner),
            CircuitState::Closed => {
                if inner.window.failure_rate() >= self.failure_threshold {
                    self.trip(&mut inner);
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Opens the circuit, doubling the open duration each consecutive
    /// trip (capped at 10x the base) so a persistently unhealthy
    /// endpoint is probed less and less often.
    fn trip(&self, inner: &mut Inner) {
        inner.state = CircuitState::Open;
        inner.opened_at = Some(Instant::now());
        inner.trip_count = inner.trip_count.saturating_add(1);
        let multiplier = inner.trip_count.min(10);
        inner.open_duration = self.base_open_duration * multiplier;
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_breaker_allows_requests() {
        let breaker = CircuitBreaker::new(0.5, 10, Duration::from_millis(50));
        assert!(breaker.allow_request());
    }

    #[test]
    fn trips_open_after_failure_threshold() {
        let breaker = CircuitBreaker::new(0.5, 4, Duration::from_secs(60));
        breaker.record_failure();
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.allow_request());
    }

    #[test]
    fn transitions_to_half_open_after_duration_then_closes_on_successes() {
        let breaker = CircuitBreaker::new(0.5, 4, Duration::from_millis(10));
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);

        std::thread::sleep(Duration::from_millis(20));
        assert!(breaker.allow_request());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        breaker.record_success();
        breaker.record_success();
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn any_failure_in_half_open_reopens() {
        let breaker = CircuitBreaker::new(0.5, 4, Duration::from_millis(10));
        breaker.record_failure();
        breaker.record_failure();
        std::thread::sleep(Duration::from_millis(20));
        assert!(breaker.allow_request());

        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
    }
}
