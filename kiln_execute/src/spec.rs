//! Types forming the hermetic executor's contract (`spec.md` §4.F).

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use kiln_hash::Digest;

#[derive(Clone, Debug, Default)]
pub struct ResourceLimits {
    pub wall_clock: Option<Duration>,
    pub cpu_time: Option<Duration>,
    pub max_memory_bytes: Option<u64>,
    pub max_file_descriptors: Option<u64>,
    pub max_processes: Option<u64>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum IsolationPolicy {
    /// Reject the result if the platform can't enforce isolation.
    Strict,
    /// Run with whatever isolation the platform offers; flag the result
    /// as non-hermetic if it had to degrade.
    #[default]
    BestEffort,
}

#[derive(Clone, Debug)]
pub struct ExecutionSpec {
    pub argv: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub cwd: PathBuf,
    pub declared_inputs: Vec<PathBuf>,
    pub declared_outputs: Vec<PathBuf>,
    pub resource_limits: ResourceLimits,
    pub isolation_policy: IsolationPolicy,
}

impl ExecutionSpec {
    pub fn new(argv: Vec<String>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            argv,
            env: BTreeMap::new(),
            cwd: cwd.into(),
            declared_inputs: Vec::new(),
            declared_outputs: Vec::new(),
            resource_limits: ResourceLimits::default(),
            isolation_policy: IsolationPolicy::default(),
        }
    }

    pub fn with_inputs(mut self, inputs: Vec<PathBuf>) -> Self {
        self.declared_inputs = inputs;
        self
    }

    pub fn with_outputs(mut self, outputs: Vec<PathBuf>) -> Self {
        self.declared_outputs = outputs;
        self
    }

    pub fn with_limits(mut self, limits: ResourceLimits) -> Self {
        self.resource_limits = limits;
        self
    }

    pub fn with_isolation(mut self, policy: IsolationPolicy) -> Self {
        self.isolation_policy = policy;
        self
    }

    /// Declared inputs and outputs must be disjoint (`spec.md` §5
    /// "shared-resource policy").
    pub fn validate_disjoint_paths(&self) -> Result<(), crate::error::ExecutionError> {
        for out in &self.declared_outputs {
            if self.declared_inputs.contains(out) {
                return Err(crate::error::ExecutionError::OverlappingOutput(
                    out.display().to_string(),
                ));
            }
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ResourceUsage {
    pub cpu_time: Duration,
    pub peak_memory_bytes: u64,
    pub io_read_bytes: u64,
    pub io_write_bytes: u64,
}

#[derive(Clone, Debug)]
pub struct ExecutionResult {
    pub exit_code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub resource_usage: ResourceUsage,
    pub output_hashes: BTreeMap<String, Digest>,
    /// Set when the isolation policy was [`IsolationPolicy::BestEffort`]
    /// and the platform couldn't actually enforce the sandbox contract.
    pub non_hermetic: bool,
}

impl ExecutionResult {
    pub fn succeeded(&self) -> bool {
        self.exit_code == Some(0)
    }
}
