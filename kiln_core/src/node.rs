//! `BuildNode`: a graph vertex wrapping a [`Target`] with scheduling state.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use kiln_hash::Digest;
use parking_lot::Mutex;

use crate::status::{BuildStatus, FailureReason};
use crate::target::Target;

/// Mutable scheduling state, split so hot-path reads (`status`,
/// `retry_attempts`) are lock-free atomics and compound updates (setting
/// status alongside `last_error`/`output_hash`) take the short mutex, per
/// the concurrency model in `spec.md` §5.
struct MutableState {
    status: parking_lot::Mutex<BuildStatus>,
    retry_attempts: AtomicU32,
    last_error: Mutex<Option<String>>,
    output_hash: Mutex<Option<Digest>>,
    failure_reason: Mutex<Option<FailureReason>>,
}

/// A vertex in the build graph. Owns its [`Target`]; dependency and
/// dependent edge *sets* live in [`crate::graph::BuildGraph`] as a separate
/// index rather than as pointers held by the node (per the arena + index
/// re-architecture note in `spec.md` §9 — no cyclic node<->graph
/// references).
pub struct BuildNode {
    pub target: Target,
    depth: AtomicU32,
    depth_memoized: std::sync::atomic::AtomicBool,
    ready_enqueued: AtomicBool,
    state: MutableState,
}

impl BuildNode {
    pub fn new(target: Target) -> Self {
        Self {
            target,
            depth: AtomicU32::new(0),
            depth_memoized: std::sync::atomic::AtomicBool::new(false),
            ready_enqueued: AtomicBool::new(false),
            state: MutableState {
                status: parking_lot::Mutex::new(BuildStatus::Pending),
                retry_attempts: AtomicU32::new(0),
                last_error: Mutex::new(None),
                output_hash: Mutex::new(None),
                failure_reason: Mutex::new(None),
            },
        }
    }

    pub fn status(&self) -> BuildStatus {
        *self.state.status.lock()
    }

    /// Applies a transition, returning `false` (and leaving state
    /// unchanged) if `next` is not reachable from the current status.
    /// The sole caller in a correct program is the scheduler, which holds
    /// the "at most one scheduler thread writes these at a time for a
    /// given node" invariant from `spec.md` §3.
    pub fn transition(&self, next: BuildStatus) -> bool {
        let mut guard = self.state.status.lock();
        if !guard.can_transition_to(next) {
            return false;
        }
        *guard = next;
        true
    }

    pub fn retry_attempts(&self) -> u32 {
        self.state.retry_attempts.load(Ordering::Acquire)
    }

    pub fn increment_retry(&self) -> u32 {
        self.state.retry_attempts.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn set_last_error(&self, error: impl Into<String>) {
        *self.state.last_error.lock() = Some(error.into());
    }

    pub fn last_error(&self) -> Option<String> {
        self.state.last_error.lock().clone()
    }

    pub fn set_output_hash(&self, digest: Digest) {
        *self.state.output_hash.lock() = Some(digest);
    }

    pub fn output_hash(&self) -> Option<Digest> {
        *self.state.output_hash.lock()
    }

    pub fn set_failure_reason(&self, reason: FailureReason) {
        *self.state.failure_reason.lock() = Some(reason);
    }

    pub fn failure_reason(&self) -> Option<FailureReason> {
        *self.state.failure_reason.lock()
    }

    pub(crate) fn memoized_depth(&self) -> Option<u32> {
        if self.depth_memoized.load(Ordering::Acquire) {
            Some(self.depth.load(Ordering::Acquire))
        } else {
            None
        }
    }

    pub(crate) fn set_memoized_depth(&self, depth: u32) {
        self.depth.store(depth, Ordering::Release);
        self.depth_memoized.store(true, Ordering::Release);
    }

    /// Claims the right to push this node onto the scheduler's ready
    /// queue exactly once. Several workers may simultaneously observe a
    /// node's last dependency becoming satisfied; only the caller whose
    /// CAS flips `false -> true` should enqueue it.
    pub fn try_claim_ready_enqueue(&self) -> bool {
        self.ready_enqueued
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Clears the enqueue claim so the node can be re-queued after a
    /// retryable failure re-enters it at `Ready`.
    pub fn reset_ready_claim(&self) {
        self.ready_enqueued.store(false, Ordering::Release);
    }
}
