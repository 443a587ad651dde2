//! The event tagged union (`spec.md` §4.J).

use kiln_core::{FailureReason, TargetId};
use kiln_hash::Digest;

#[derive(Clone, Debug)]
pub enum Event {
    BuildStarted { target_count: usize },
    BuildCompleted { succeeded: usize, cached: usize, failed: usize },
    BuildFailed { reason: String },
    TargetStarted { target: TargetId },
    TargetCompleted { target: TargetId, output_hash: Option<Digest> },
    TargetFailed { target: TargetId, reason: FailureReason },
    TargetCached { target: TargetId },
    TargetProgress { target: TargetId, message: String },
    Statistics { tasks_per_sec: f64, worker_utilization: f64 },
    Message { level: MessageLevel, text: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageLevel {
    Info,
    Warning,
    Error,
}

/// Bitmask over [`Event`] kinds, used by subscribers to filter interest
/// without the bus itself branching on subscriber-specific logic.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EventMask(u32);

impl EventMask {
    pub const BUILD_LIFECYCLE: u32 = 1 << 0;
    pub const TARGET_LIFECYCLE: u32 = 1 << 1;
    pub const PROGRESS: u32 = 1 << 2;
    pub const STATISTICS: u32 = 1 << 3;
    pub const MESSAGE: u32 = 1 << 4;
    pub const ALL: u32 = Self::BUILD_LIFECYCLE
        | Self::TARGET_LIFECYCLE
        | Self::PROGRESS
        | Self::STATISTICS
        | Self::MESSAGE;

    pub const fn new(bits: u32) -> Self {
        Self(bits)
    }

    pub fn matches(&self, event: &Event) -> bool {
        self.0 & Self::kind_bit(event) != 0
    }

    fn kind_bit(event: &Event) -> u32 {
        match event {
            Event::BuildStarted { .. } | Event::BuildCompleted { .. } | Event::BuildFailed { .. } => {
                Self::BUILD_LIFECYCLE
            }
            Event::TargetStarted { .. }
            | Event::TargetCompleted { .. }
            | Event::TargetFailed { .. }
            | Event::TargetCached { .. } => Self::TARGET_LIFECYCLE,
            Event::TargetProgress { .. } => Self::PROGRESS,
            Event::Statistics { .. } => Self::STATISTICS,
            Event::Message { .. } => Self::MESSAGE,
        }
    }
}

impl Default for EventMask {
    fn default() -> Self {
        Self::new(Self::ALL)
    }
}
