//! `Action`: the command-plus-contract a handler produces from a target
//! (`spec.md` §6).

use std::collections::BTreeMap;
use std::path::PathBuf;

use kiln_core::ActionId;
use kiln_execute::ResourceLimits;

#[derive(Clone, Debug)]
pub struct Action {
    pub id: ActionId,
    pub argv: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub inputs: Vec<PathBuf>,
    pub outputs: Vec<PathBuf>,
    pub metadata: BTreeMap<String, String>,
    pub limits: ResourceLimits,
}

impl Action {
    pub fn new(id: ActionId, argv: Vec<String>) -> Self {
        Self {
            id,
            argv,
            env: BTreeMap::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            metadata: BTreeMap::new(),
            limits: ResourceLimits::default(),
        }
    }

    pub fn with_inputs(mut self, inputs: Vec<PathBuf>) -> Self {
        self.inputs = inputs;
        self
    }

    pub fn with_outputs(mut self, outputs: Vec<PathBuf>) -> Self {
        self.outputs = outputs;
        self
    }

    pub fn with_metadata(mut self, metadata: BTreeMap<String, String>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = limits;
        self
    }
}

#[derive(Clone, Debug)]
pub struct ActionResult {
    pub action_id: ActionId,
    pub success: bool,
    pub output_hashes: BTreeMap<String, kiln_hash::Digest>,
    pub non_hermetic: bool,
    /// Whether this result came from a cache hit rather than a fresh
    /// execution (`spec.md` §4.D), so a caller can tell cache reuse
    /// apart from a target that genuinely ran.
    pub cache_hit: bool,
}
