//! Action identity (`spec.md` §3/§4.C).

use std::collections::BTreeMap;

use kiln_hash::Digest;
use serde::{Deserialize, Serialize};

use crate::target::TargetId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Compile,
    Link,
    Transform,
    Package,
    Test,
    Custom,
}

/// `(target_id, action_kind, input_hash, sub_id)`. `sub_id` distinguishes
/// sub-actions of the same kind on the same target (one per compiled
/// source file, for instance).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActionId {
    pub target_id: TargetId,
    pub kind: ActionKind,
    pub input_hash: Digest,
    pub sub_id: String,
}

impl ActionId {
    pub fn new(target_id: TargetId, kind: ActionKind, input_hash: Digest) -> Self {
        Self {
            target_id,
            kind,
            input_hash,
            sub_id: String::new(),
        }
    }

    pub fn with_sub_id(mut self, sub_id: impl Into<String>) -> Self {
        self.sub_id = sub_id.into();
        self
    }
}

/// BLAKE3 over the canonical serialization of `(ActionId, sorted metadata
/// map, declared tool identity)`. Same inputs + same metadata + same tool
/// implies the same key (`spec.md` §3/§4.C).
///
/// Construction lives in `kiln_cache` (which owns the on-disk cache and the
/// metadata-serialization format); this type is just the opaque key
/// newtype so both `kiln_core` consumers and `kiln_cache` producers agree
/// on its shape.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ActionKey(pub Digest);

impl std::fmt::Display for ActionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Canonical metadata serialization used by action identity: sorted-key,
/// sorted-value, `\0`-separated bytes. Exposed here so both the identity
/// builder and tests can share one implementation.
pub fn serialize_metadata(metadata: &BTreeMap<String, String>) -> Vec<u8> {
    let mut buf = Vec::new();
    for (k, v) in metadata {
        buf.extend_from_slice(k.as_bytes());
        buf.push(0);
        buf.extend_from_slice(v.as_bytes());
        buf.push(0);
    }
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_serialization_is_order_independent() {
        let mut a = BTreeMap::new();
        a.insert("b".to_string(), "2".to_string());
        a.insert("a".to_string(), "1".to_string());

        let mut b = BTreeMap::new();
        b.insert("a".to_string(), "1".to_string());
        b.insert("b".to_string(), "2".to_string());

        assert_eq!(serialize_metadata(&a), serialize_metadata(&b));
    }

    #[test]
    fn metadata_serialization_distinguishes_values() {
        let mut a = BTreeMap::new();
        a.insert("k".to_string(), "1".to_string());
        let mut b = BTreeMap::new();
        b.insert("k".to_string(), "2".to_string());
        assert_ne!(serialize_metadata(&a), serialize_metadata(&b));
    }
}
