//! Rolling health metrics derived from a [`crate::session::BuildSession`]
//! snapshot (`spec.md` §4.K).

use serde::{Deserialize, Serialize};

/// Derived from thresholds on the rolling metrics: a stalled build
/// (`tasks_per_sec` near zero with targets still outstanding) or a high
/// failure rate degrades status even though no single metric alone is
/// fatal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    Healthy,
    Warning,
    Degraded,
    Critical,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HealthCheckpoint {
    pub timestamp_unix_secs: u64,
    pub tasks_per_sec: f64,
    pub worker_utilization: f64,
    pub targets_total: usize,
    pub targets_completed: usize,
    pub targets_failed: usize,
    pub status: HealthStatus,
}

impl HealthCheckpoint {
    pub fn new(
        timestamp_unix_secs: u64,
        tasks_per_sec: f64,
        worker_utilization: f64,
        targets_total: usize,
        targets_completed: usize,
        targets_failed: usize,
    ) -> Self {
        let status = Self::derive_status(
            tasks_per_sec,
            worker_utilization,
            targets_total,
            targets_completed,
            targets_failed,
        );
        Self {
            timestamp_unix_secs,
            tasks_per_sec,
            worker_utilization,
            targets_total,
            targets_completed,
            targets_failed,
            status,
        }
    }

    fn derive_status(
        tasks_per_sec: f64,
        worker_utilization: f64,
        targets_total: usize,
        targets_completed: usize,
        targets_failed: usize,
    ) -> HealthStatus {
        if targets_total == 0 {
            return HealthStatus::Healthy;
        }
        let failure_rate = targets_failed as f64 / targets_total as f64;
        let still_outstanding = targets_completed < targets_total;

        if failure_rate >= 0.5 {
            return HealthStatus::Critical;
        }
        if failure_rate >= 0.2 {
            return HealthStatus::Degraded;
        }
        if still_outstanding && tasks_per_sec < 0.01 && worker_utilization < 0.05 {
            return HealthStatus::Warning;
        }
        HealthStatus::Healthy
    }
}
