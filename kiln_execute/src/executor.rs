//! Runs an [`ExecutionSpec`] to completion and produces an
//! [`ExecutionResult`], enforcing resource limits and the declared
//! isolation policy (`spec.md` §4.F).

use std::collections::BTreeMap;

use crate::error::{ExecutionError, LimitExceededError};
use crate::process::{self, GatherOutputStatus};
use crate::rusage;
use crate::sandbox;
use crate::spec::{ExecutionResult, ExecutionSpec, IsolationPolicy};

pub struct HermeticExecutor;

impl HermeticExecutor {
    pub fn new() -> Self {
        Self
    }

    /// Runs `spec.argv` under the declared resource limits and
    /// isolation policy, hashing declared outputs on success.
    pub async fn execute(
        &self,
        spec: &ExecutionSpec,
    ) -> Result<ExecutionResult, ExecuteOutcomeError> {
        spec.validate_disjoint_paths()
            .map_err(ExecuteOutcomeError::Execution)?;

        let mut cmd = std::process::Command::new(
            spec.argv.first().ok_or_else(|| {
                ExecuteOutcomeError::Execution(ExecutionError::Spawn {
                    argv0: String::new(),
                    source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty argv"),
                })
            })?,
        );
        cmd.args(&spec.argv[1..]);
        cmd.current_dir(&spec.cwd);
        cmd.env_clear();
        cmd.envs(&spec.env);

        let mut non_hermetic = spec.isolation_policy == IsolationPolicy::BestEffort;
        match sandbox::apply(&mut cmd, &spec.resource_limits, spec.isolation_policy) {
            Ok(()) => {
                if spec.isolation_policy == IsolationPolicy::Strict {
                    non_hermetic = false;
                }
            }
            Err(e) => return Err(ExecuteOutcomeError::Sandbox(e)),
        }

        let cmd = process::prepare_command(cmd);

        let before = rusage::snapshot_children();

        let cancellation = process::timeout_into_cancellation(spec.resource_limits.wall_clock);
        let (status, stdout, stderr) = process::gather_output(cmd, cancellation)
            .await
            .map_err(|e| {
                ExecuteOutcomeError::Execution(ExecutionError::Spawn {
                    argv0: spec.argv[0].clone(),
                    source: std::io::Error::new(std::io::ErrorKind::Other, e.to_string()),
                })
            })?;

        let after = rusage::snapshot_children();
        let resource_usage = rusage::delta(before, after);

        let exit_code = match status {
            GatherOutputStatus::Finished(code) => code,
            GatherOutputStatus::TimedOut(d) => {
                return Err(ExecuteOutcomeError::LimitExceeded(
                    LimitExceededError::WallClock(d),
                ));
            }
            GatherOutputStatus::Cancelled => return Err(ExecuteOutcomeError::Cancelled),
        };

        if let Some(limit) = spec.resource_limits.max_memory_bytes {
            if resource_usage.peak_memory_bytes > limit {
                return Err(ExecuteOutcomeError::LimitExceeded(
                    LimitExceededError::Memory(resource_usage.peak_memory_bytes),
                ));
            }
        }
        if let Some(limit) = spec.resource_limits.cpu_time {
            if resource_usage.cpu_time > limit {
                return Err(ExecuteOutcomeError::LimitExceeded(
                    LimitExceededError::CpuTime(resource_usage.cpu_time),
                ));
            }
        }

        let mut output_hashes = BTreeMap::new();
        if exit_code == Some(0) {
            for path in &spec.declared_outputs {
                let full_path = spec.cwd.join(path);
                let digest = kiln_hash::hash_file(&full_path).map_err(|_| {
                    ExecuteOutcomeError::Execution(ExecutionError::MissingOutput(
                        path.display().to_string(),
                    ))
                })?;
                let name = path.display().to_string();
                output_hashes.insert(name, digest);
            }
        }

        Ok(ExecutionResult {
            exit_code,
            stdout,
            stderr,
            resource_usage,
            output_hashes,
            non_hermetic,
        })
    }
}

impl Default for HermeticExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ExecuteOutcomeError {
    #[error(transparent)]
    Execution(#[from] ExecutionError),
    #[error(transparent)]
    LimitExceeded(#[from] LimitExceededError),
    #[error(transparent)]
    Sandbox(#[from] crate::error::SandboxError),
    #[error("execution cancelled")]
    Cancelled,
}
