//! Monotonic set-once cancellation flag, consulted at each scheduler
//! loop iteration and before each sub-action (`spec.md` §5).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Clone, Default)]
pub struct AbortFlag(Arc<AtomicBool>);

impl AbortFlag {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_clear_and_latches_on_trigger() {
        let flag = AbortFlag::new();
        assert!(!flag.is_set());
        flag.trigger();
        assert!(flag.is_set());
    }

    #[test]
    fn clones_share_state() {
        let flag = AbortFlag::new();
        let clone = flag.clone();
        clone.trigger();
        assert!(flag.is_set());
    }
}
