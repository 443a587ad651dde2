//! `BuildSession`: the live state of one build, fed by subscribing to
//! the event bus (`spec.md` §4.K). Reads are cheap (a single
//! `parking_lot::RwLock`); the session never blocks event emission for
//! longer than a map update.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use kiln_core::{FailureReason, TargetId};
use kiln_events::{Event, EventSink};
use kiln_hash::Digest;
use parking_lot::RwLock;

use crate::health::HealthCheckpoint;

const TASKS_PER_SEC_WINDOW: Duration = Duration::from_secs(10);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TargetRunState {
    Started,
    Succeeded,
    Cached,
    Failed,
}

#[derive(Clone, Debug)]
pub struct TargetRecord {
    pub state: TargetRunState,
    pub started_at: Option<Instant>,
    pub completed_at: Option<Instant>,
    pub output_hash: Option<Digest>,
    pub failure_reason: Option<FailureReason>,
}

struct Inner {
    targets: HashMap<TargetId, TargetRecord>,
    total_targets: usize,
    running_count: u64,
    completed_count: u64,
    failed_count: u64,
    recent_completions: VecDeque<Instant>,
    environment: BTreeMap<String, String>,
    build_started_at: Option<Instant>,
    build_completed: bool,
}

impl Inner {
    fn new() -> Self {
        Self {
            targets: HashMap::new(),
            total_targets: 0,
            running_count: 0,
            completed_count: 0,
            failed_count: 0,
            recent_completions: VecDeque::new(),
            environment: capture_environment(),
            build_started_at: None,
            build_completed: false,
        }
    }

    fn prune_recent(&mut self, now: Instant) {
        while let Some(front) = self.recent_completions.front() {
            if now.duration_since(*front) > TASKS_PER_SEC_WINDOW {
                self.recent_completions.pop_front();
            } else {
                break;
            }
        }
    }
}

fn capture_environment() -> BTreeMap<String, String> {
    std::env::vars()
        .filter(|(k, _)| k.starts_with("BUILDER_"))
        .collect()
}

/// Tracks one build's targets and rolling throughput; implements
/// [`EventSink`] so it can subscribe directly to an [`kiln_events::EventBus`].
pub struct BuildSession {
    inner: RwLock<Inner>,
    worker_count: usize,
}

impl BuildSession {
    pub fn new(worker_count: usize) -> Self {
        Self {
            inner: RwLock::new(Inner::new()),
            worker_count: worker_count.max(1),
        }
    }

    pub fn target_record(&self, id: &TargetId) -> Option<TargetRecord> {
        self.inner.read().targets.get(id).cloned()
    }

    /// A point-in-time health reading; safe to call repeatedly while the
    /// build runs.
    pub fn snapshot(&self) -> HealthCheckpoint {
        let now = Instant::now();
        let mut inner = self.inner.write();
        inner.prune_recent(now);

        let window_secs = inner
            .build_started_at
            .map(|started| now.duration_since(started).as_secs_f64())
            .unwrap_or(0.0)
            .min(TASKS_PER_SEC_WINDOW.as_secs_f64())
            .max(0.001);
        let tasks_per_sec = inner.recent_completions.len() as f64 / window_secs;
        let worker_utilization = inner.running_count as f64 / self.worker_count as f64;

        HealthCheckpoint::new(
            unix_now(),
            tasks_per_sec,
            worker_utilization,
            inner.total_targets,
            inner.completed_count as usize,
            inner.failed_count as usize,
        )
    }

    /// The terminal checkpoint, taken once `BuildCompleted` has been
    /// observed. Returns `None` if the build is still in flight.
    pub fn finalize(&self) -> Option<HealthCheckpoint> {
        if !self.inner.read().build_completed {
            return None;
        }
        Some(self.snapshot())
    }

    pub fn environment(&self) -> BTreeMap<String, String> {
        self.inner.read().environment.clone()
    }
}

impl EventSink for BuildSession {
    fn on_event(&self, event: &Event) {
        let now = Instant::now();
        let mut inner = self.inner.write();
        match event {
            Event::BuildStarted { target_count } => {
                inner.total_targets = *target_count;
                inner.build_started_at = Some(now);
            }
            Event::TargetStarted { target } => {
                inner.running_count += 1;
                inner.targets.insert(
                    target.clone(),
                    TargetRecord {
                        state: TargetRunState::Started,
                        started_at: Some(now),
                        completed_at: None,
                        output_hash: None,
                        failure_reason: None,
                    },
                );
            }
            Event::TargetCompleted { target, output_hash } => {
                inner.running_count = inner.running_count.saturating_sub(1);
                inner.completed_count += 1;
                inner.recent_completions.push_back(now);
                inner.prune_recent(now);
                if let Some(record) = inner.targets.get_mut(target) {
                    record.state = TargetRunState::Succeeded;
                    record.completed_at = Some(now);
                    record.output_hash = *output_hash;
                }
            }
            Event::TargetCached { target } => {
                inner.running_count = inner.running_count.saturating_sub(1);
                inner.completed_count += 1;
                inner.recent_completions.push_back(now);
                inner.prune_recent(now);
                if let Some(record) = inner.targets.get_mut(target) {
                    record.state = TargetRunState::Cached;
                    record.completed_at = Some(now);
                }
            }
            Event::TargetFailed { target, reason } => {
                inner.running_count = inner.running_count.saturating_sub(1);
                inner.completed_count += 1;
                inner.failed_count += 1;
                let entry = inner.targets.entry(target.clone()).or_insert(TargetRecord {
                    state: TargetRunState::Failed,
                    started_at: None,
                    completed_at: None,
                    output_hash: None,
                    failure_reason: None,
                });
                entry.state = TargetRunState::Failed;
                entry.completed_at = Some(now);
                entry.failure_reason = Some(*reason);
            }
            Event::BuildCompleted { .. } => {
                inner.build_completed = true;
            }
            _ => {}
        }
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_core::FailureReason;

    fn id(name: &str) -> TargetId {
        TargetId::new("ws", "p", name)
    }

    #[test]
    fn tracks_lifecycle_counts() {
        let session = BuildSession::new(4);
        session.on_event(&Event::BuildStarted { target_count: 2 });
        session.on_event(&Event::TargetStarted { target: id("a") });
        session.on_event(&Event::TargetCompleted {
            target: id("a"),
            output_hash: None,
        });
        session.on_event(&Event::TargetStarted { target: id("b") });
        session.on_event(&Event::TargetFailed {
            target: id("b"),
            reason: FailureReason::ActionFailed,
        });
        session.on_event(&Event::BuildCompleted {
            succeeded: 1,
            cached: 0,
            failed: 1,
        });

        let checkpoint = session.finalize().expect("build completed");
        assert_eq!(checkpoint.targets_total, 2);
        assert_eq!(checkpoint.targets_completed, 2);
        assert_eq!(checkpoint.targets_failed, 1);

        let record = session.target_record(&id("b")).unwrap();
        assert_eq!(record.state, TargetRunState::Failed);
        assert_eq!(record.failure_reason, Some(FailureReason::ActionFailed));
    }

    #[test]
    fn finalize_is_none_before_build_completed() {
        let session = BuildSession::new(2);
        session.on_event(&Event::BuildStarted { target_count: 1 });
        assert!(session.finalize().is_none());
    }

    #[test]
    fn environment_captures_builder_prefixed_vars_only() {
        std::env::set_var("BUILDER_PARALLEL", "4");
        std::env::set_var("UNRELATED_VAR", "x");
        let session = BuildSession::new(1);
        let env = session.environment();
        assert_eq!(env.get("BUILDER_PARALLEL").map(String::as_str), Some("4"));
        assert!(!env.contains_key("UNRELATED_VAR"));
        std::env::remove_var("BUILDER_PARALLEL");
        std::env::remove_var("UNRELATED_VAR");
    }
}
