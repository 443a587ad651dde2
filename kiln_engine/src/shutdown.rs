//! `ShutdownCoordinator`: deterministic, reverse-order resource release,
//! replacing finalizer-based cleanup (`spec.md` §9 re-architecture note,
//! §4.I).

use parking_lot::Mutex;

type Callback = Box<dyn FnOnce() + Send>;

pub struct ShutdownCoordinator {
    callbacks: Mutex<Option<Vec<Callback>>>,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self {
            callbacks: Mutex::new(Some(Vec::new())),
        }
    }

    /// Registers a close callback. Callbacks run in reverse registration
    /// order, so the subsystem opened last is closed first.
    pub fn register(&self, callback: impl FnOnce() + Send + 'static) {
        if let Some(callbacks) = self.callbacks.lock().as_mut() {
            callbacks.push(Box::new(callback));
        }
    }

    /// Runs every registered callback once, in reverse order. Idempotent:
    /// a second call (or the `Drop` impl firing afterward) is a no-op.
    pub fn shutdown(&self) {
        let taken = self.callbacks.lock().take();
        if let Some(mut callbacks) = taken {
            while let Some(callback) = callbacks.pop() {
                callback();
            }
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ShutdownCoordinator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex as StdMutex};

    #[test]
    fn callbacks_run_in_reverse_order() {
        let order = Arc::new(StdMutex::new(Vec::new()));
        let coordinator = ShutdownCoordinator::new();

        let o1 = order.clone();
        coordinator.register(move || o1.lock().unwrap().push(1));
        let o2 = order.clone();
        coordinator.register(move || o2.lock().unwrap().push(2));
        let o3 = order.clone();
        coordinator.register(move || o3.lock().unwrap().push(3));

        coordinator.shutdown();
        assert_eq!(*order.lock().unwrap(), vec![3, 2, 1]);
    }

    #[test]
    fn shutdown_is_idempotent() {
        let count = Arc::new(StdMutex::new(0));
        let coordinator = ShutdownCoordinator::new();
        let c = count.clone();
        coordinator.register(move || *c.lock().unwrap() += 1);

        coordinator.shutdown();
        coordinator.shutdown();
        assert_eq!(*count.lock().unwrap(), 1);
    }

    #[test]
    fn drop_runs_unshut_callbacks() {
        let count = Arc::new(StdMutex::new(0));
        {
            let coordinator = ShutdownCoordinator::new();
            let c = count.clone();
            coordinator.register(move || *c.lock().unwrap() += 1);
        }
        assert_eq!(*count.lock().unwrap(), 1);
    }
}
