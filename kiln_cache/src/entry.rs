//! `ActionEntry` — the metadata record stored per cached action
//! (`spec.md` §3/§6).

use std::collections::BTreeMap;

use kiln_hash::Digest;
use serde::{Deserialize, Serialize};

/// What a completed action produced, keyed by the output name declared
/// by the target (e.g. `"out"`, `"stdout"`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ActionEntry {
    pub output_hashes: BTreeMap<String, Digest>,
    pub success: bool,
    /// Seconds since the Unix epoch. Stamped by the caller — this crate
    /// never reads the system clock itself so tests stay deterministic.
    pub created_at: u64,
    pub size_bytes: u64,
    pub last_accessed: u64,
}

impl ActionEntry {
    pub fn new_success(output_hashes: BTreeMap<String, Digest>, size_bytes: u64, now: u64) -> Self {
        Self {
            output_hashes,
            success: true,
            created_at: now,
            size_bytes,
            last_accessed: now,
        }
    }

    pub fn new_failure(now: u64) -> Self {
        Self {
            output_hashes: BTreeMap::new(),
            success: false,
            created_at: now,
            size_bytes: 0,
            last_accessed: now,
        }
    }

    pub fn touch(&mut self, now: u64) {
        self.last_accessed = now;
    }

    /// A cached failure is only trusted for a short window (`spec.md`
    /// §9) — long enough to dedupe rapid-fire retries of the same
    /// broken action, short enough that a fixed-and-rerun build doesn't
    /// keep replaying a stale failure.
    pub fn is_expired_failure(&self, now: u64, failure_ttl_secs: u64) -> bool {
        !self.success && now.saturating_sub(self.created_at) > failure_ttl_secs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_failure_is_not_expired() {
        let entry = ActionEntry::new_failure(1000);
        assert!(!entry.is_expired_failure(1000, 600));
    }

    #[test]
    fn stale_failure_is_expired() {
        let entry = ActionEntry::new_failure(1000);
        assert!(entry.is_expired_failure(1700, 600));
    }

    #[test]
    fn success_entries_are_never_expired_failures() {
        let entry = ActionEntry::new_success(BTreeMap::new(), 0, 1000);
        assert!(!entry.is_expired_failure(100_000, 600));
    }
}
