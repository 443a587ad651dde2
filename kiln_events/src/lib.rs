//! Typed event bus: a bounded, non-dropping publish/subscribe channel
//! carrying build lifecycle events to observability and CLI
//! subscribers. See `SPEC_FULL.md` §4.J.

pub mod bus;
pub mod event;

pub use bus::{EventBus, EventSink};
pub use event::{Event, EventMask, MessageLevel};
