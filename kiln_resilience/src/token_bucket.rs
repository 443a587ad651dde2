//! Token bucket rate limiter: refills at `rate_per_sec` up to
//! `capacity`; `Priority::Critical` requests bypass the bucket while
//! the circuit is closed (`spec.md` §4.L).

use std::time::Instant;

use parking_lot::Mutex;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Priority {
    Normal,
    Critical,
}

struct Inner {
    tokens: f64,
    last_refill: Instant,
}

pub struct TokenBucket {
    capacity: f64,
    rate_per_sec: f64,
    inner: Mutex<Inner>,
}

impl TokenBucket {
    pub fn new(capacity: u32, rate_per_sec: f64) -> Self {
        Self {
            capacity: capacity as f64,
            rate_per_sec,
            inner: Mutex::new(Inner {
                tokens: capacity as f64,
                last_refill: Instant::now(),
            }),
        }
    }

    fn refill(&self, inner: &mut Inner) {
        let now = Instant::now();
        let elapsed = now.duration_since(inner.last_refill).as_secs_f64();
        inner.tokens = (inner.tokens + elapsed * self.rate_per_sec).min(self.capacity);
        inner.last_refill = now;
    }

    /// Attempts to take one token. `Critical` requests always succeed
    /// — the caller is expected to only mark genuinely critical work
    /// this way, since it bypasses backpressure entirely.
    pub fn try_acquire(&self, priority: Priority) -> bool {
        if priority == Priority::Critical {
            return true;
        }
        let mut inner = self.inner.lock();
        self.refill(&mut inner);
        if inner.tokens >= 1.0 {
            inner.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    pub fn available_tokens(&self) -> f64 {
        let mut inner = self.inner.lock();
        self.refill(&mut inner);
        inner.tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn drains_then_refuses() {
        let bucket = TokenBucket::new(2, 1.0);
        assert!(bucket.try_acquire(Priority::Normal));
        assert!(bucket.try_acquire(Priority::Normal));
        assert!(!bucket.try_acquire(Priority::Normal));
    }

    #[test]
    fn refills_over_time() {
        let bucket = TokenBucket::new(1, 100.0);
        assert!(bucket.try_acquire(Priority::Normal));
        assert!(!bucket.try_acquire(Priority::Normal));
        std::thread::sleep(Duration::from_millis(20));
        assert!(bucket.try_acquire(Priority::Normal));
    }

    #[test]
    fn critical_bypasses_empty_bucket() {
        let bucket = TokenBucket::new(0, 0.0);
        assert!(bucket.try_acquire(Priority::Critical));
    }
}
