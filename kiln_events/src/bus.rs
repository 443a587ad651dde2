//! `EventBus`: publish/subscribe over a bounded channel with a
//! dedicated emit thread. Publishing blocks (with a warning) rather
//! than dropping when the queue is full — dropping events is
//! unacceptable (`spec.md` §4.J).

use std::sync::Arc;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::RwLock;

use crate::event::{Event, EventMask};

/// Anything that wants to observe events. Called from the bus's single
/// emit thread, so implementations should be quick — slow subscribers
/// throttle every publisher.
pub trait EventSink: Send + Sync {
    fn on_event(&self, event: &Event);
}

struct Subscription {
    mask: EventMask,
    sink: Arc<dyn EventSink>,
}

pub struct EventBus {
    sender: Sender<Event>,
    subscribers: Arc<RwLock<Vec<Subscription>>>,
    _emit_thread: std::thread::JoinHandle<()>,
}

impl EventBus {
    /// Spawns the emit thread and returns a bus whose `publish` callers
    /// never see that thread directly. `capacity` bounds the queue;
    /// once full, `publish` blocks until a slot frees up, logging a
    /// warning on the first such stall.
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = bounded(capacity);
        let subscribers: Arc<RwLock<Vec<Subscription>>> = Arc::new(RwLock::new(Vec::new()));
        let emit_subscribers = subscribers.clone();

        let emit_thread = std::thread::Builder::new()
            .name("kiln-event-bus".to_string())
            .spawn(move || {
                Self::emit_loop(receiver, emit_subscribers);
            })
            .expect("failed to spawn event bus thread");

        Self {
            sender,
            subscribers,
            _emit_thread: emit_thread,
        }
    }

    fn emit_loop(receiver: Receiver<Event>, subscribers: Arc<RwLock<Vec<Subscription>>>) {
        while let Ok(event) = receiver.recv() {
            for sub in subscribers.read().iter() {
                if sub.mask.matches(&event) {
                    sub.sink.on_event(&event);
                }
            }
        }
    }

    pub fn subscribe(&self, mask: EventMask, sink: Arc<dyn EventSink>) {
        self.subscribers.write().push(Subscription { mask, sink });
    }

    pub fn publish(&self, event: Event) {
        match self.sender.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                tracing::warn!("event bus queue full, publisher blocking");
                let _ = self.sender.send(event);
            }
            Err(TrySendError::Disconnected(_)) => {
                tracing::error!("event bus emit thread is gone, event dropped");
            }
        }
    }
}
