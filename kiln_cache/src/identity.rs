//! Builds the [`ActionKey`](kiln_core::ActionKey) that identifies a
//! reproducible unit of work: `BLAKE3(ActionId || sorted metadata ||
//! declared tool identity)` (`spec.md` §3/§4.C).

use std::collections::BTreeMap;
use std::path::Path;

use kiln_core::action::serialize_metadata;
use kiln_core::{ActionId, ActionKey};
use kiln_hash::Digest;

/// The declared identity of the tool that will execute an action —
/// version string plus any flags that affect its output. Two actions
/// with identical inputs but different tool identities must never
/// collide in the cache.
#[derive(Clone, Debug, Default)]
pub struct ToolIdentity {
    pub name: String,
    pub version: String,
    pub flags: Vec<String>,
}

impl ToolIdentity {
    fn digest(&self) -> Digest {
        let mut parts = vec![self.name.clone(), self.version.clone()];
        parts.extend(self.flags.iter().cloned());
        kiln_hash::hash_sequence(parts)
    }
}

/// Computes the [`ActionKey`] for `action_id`, folding in `metadata`
/// (already-sorted by [`serialize_metadata`]) and `tool`.
pub fn compute_action_key(
    action_id: &ActionId,
    metadata: &BTreeMap<String, String>,
    tool: &ToolIdentity,
) -> ActionKey {
    let id_bytes = serde_json::to_vec(action_id).expect("ActionId serializes");
    let metadata_bytes = serialize_metadata(metadata);
    let tool_digest = tool.digest();

    let mut hasher = blake3::Hasher::new();
    hasher.update(&id_bytes);
    hasher.update(&metadata_bytes);
    hasher.update(tool_digest.as_bytes());
    ActionKey(Digest::from_hash(hasher.finalize()))
}

/// Convenience wrapper that hashes a target's declared input files (in
/// declared order) into the `input_hash` component of an [`ActionId`],
/// matching `spec.md` §4.C's "same file contents in the same order".
pub fn hash_inputs<P: AsRef<Path>>(paths: &[P]) -> Result<Digest, kiln_hash::HashError> {
    if paths.is_empty() {
        return Ok(kiln_hash::EMPTY_DIGEST);
    }
    kiln_hash::hash_files_ordered(paths)
}
