//! The action cache: ties [`SignedStore`] (entry index), [`BlobStore`]
//! (artifact bytes), and an in-memory reservation map together to give
//! at-most-one-builder-per-key semantics (`spec.md` §4.D).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use kiln_core::ActionKey;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::blob::BlobStore;
use crate::entry::ActionEntry;
use crate::error::CacheError;
use crate::store::{GetOutcome, SignedStore};

/// Default window a cached failure is trusted before a retry is allowed
/// to attempt the action again (`spec.md` §9 open question).
pub const DEFAULT_FAILURE_TTL_SECS: u64 = 600;

/// Result of probing the cache for a key, distinguishing a clean hit
/// from one that should be retried.
pub enum Lookup {
    Hit(ActionEntry),
    Miss,
}

/// A permit returned by [`ActionCache::reserve`]. Exactly one caller
/// per key holds this at a time; dropping it without calling
/// [`ActionCache::record`] releases the reservation so a waiter can
/// retry the build rather than wait forever.
pub struct BuildPermit {
    key: ActionKey,
    reservations: Arc<Mutex<HashMap<ActionKey, Arc<Notify>>>>,
    fulfilled: bool,
}

impl BuildPermit {
    pub fn key(&self) -> &ActionKey {
        &self.key
    }
}

impl Drop for BuildPermit {
    fn drop(&mut self) {
        if self.fulfilled {
            return;
        }
        if let Some(notify) = self.reservations.lock().remove(&self.key) {
            notify.notify_waiters();
        }
    }
}

pub struct ActionCache {
    entries: SignedStore,
    blobs: BlobStore,
    reservations: Arc<Mutex<HashMap<ActionKey, Arc<Notify>>>>,
    failure_ttl_secs: u64,
    /// Invoked with the offending key whenever a stored entry's MAC
    /// fails to verify, so a caller that does own an event bus (this
    /// crate deliberately doesn't) can raise a warning (`spec.md` §8
    /// scenario 5).
    tamper_hook: Option<Arc<dyn Fn(&ActionKey) + Send + Sync>>,
}

pub enum Reservation {
    /// No other builder holds this key; caller must build it and call
    /// [`ActionCache::record`], or drop the permit to release the slot.
    Build(BuildPermit),
    /// The result is already cached and usable.
    Cached(ActionEntry),
}

impl ActionCache {
    pub fn open(cache_dir: impl AsRef<Path>) -> Result<Self, CacheError> {
        let cache_dir = cache_dir.as_ref();
        Ok(Self {
            entries: SignedStore::open(cache_dir.join("entries"))?,
            blobs: BlobStore::open(cache_dir.join("blobs"))?,
            reservations: Arc::new(Mutex::new(HashMap::new())),
            failure_ttl_secs: DEFAULT_FAILURE_TTL_SECS,
            tamper_hook: None,
        })
    }

    pub fn with_failure_ttl_secs(mut self, secs: u64) -> Self {
        self.failure_ttl_secs = secs;
        self
    }

    pub fn with_tamper_hook(mut self, hook: Arc<dyn Fn(&ActionKey) + Send + Sync>) -> Self {
        self.tamper_hook = Some(hook);
        self
    }

    fn entry_key(key: &ActionKey) -> String {
        key.0.to_hex()
    }

    pub fn lookup(&self, key: &ActionKey, now: u64) -> Result<Lookup, CacheError> {
        let bytes = match self.entries.get_checked(&Self::entry_key(key))? {
            GetOutcome::Found(bytes) => bytes,
            GetOutcome::NotFound => return Ok(Lookup::Miss),
            GetOutcome::Tampered => {
                if let Some(hook) = &self.tamper_hook {
                    hook(key);
                }
                return Ok(Lookup::Miss);
            }
        };
        let entry: ActionEntry =
            serde_json::from_slice(&bytes).map_err(|_| CacheError::MalformedRecord)?;
        if entry.is_expired_failure(now, self.failure_ttl_secs) {
            self.entries.delete(&Self::entry_key(key))?;
            return Ok(Lookup::Miss);
        }
        if entry.success && entry.output_hashes.values().any(|digest| !self.blobs.contains(digest)) {
            // The index entry survived but a referenced blob didn't — demote
            // to a miss rather than hand back a result the caller can't
            // actually read (`spec.md` §4.D `is_cached()` contract).
            self.entries.delete(&Self::entry_key(key))?;
            return Ok(Lookup::Miss);
        }
        Ok(Lookup::Hit(entry))
    }

    /// Checks the cache, then either returns the cached entry or a
    /// build permit. Concurrent callers for the same key after the
    /// first all wait on the same [`Notify`] and re-check the cache
    /// once the builder finishes, rather than racing into duplicate
    /// work (`spec.md` §4.D "at most one builder").
    pub async fn reserve(&self, key: &ActionKey, now: u64) -> Result<Reservation, CacheError> {
        loop {
            if let Lookup::Hit(entry) = self.lookup(key, now)? {
                return Ok(Reservation::Cached(entry));
            }

            let notify = {
                let mut reservations = self.reservations.lock();
                if let Some(existing) = reservations.get(key) {
                    Some(existing.clone())
                } else {
                    reservations.insert(key.clone(), Arc::new(Notify::new()));
                    None
                }
            };

            match notify {
                Some(notify) => notify.notified().await,
                None => {
                    return Ok(Reservation::Build(BuildPermit {
                        key: key.clone(),
                        reservations: self.reservations.clone(),
                        fulfilled: false,
                    }))
                }
            }
        }
    }

    /// Records the outcome of a build held under `permit`, persists the
    /// entry, and wakes any waiters.
    pub fn record(
        &self,
        mut permit: BuildPermit,
        entry: ActionEntry,
    ) -> Result<(), CacheError> {
        let bytes = serde_json::to_vec(&entry).map_err(|_| CacheError::MalformedRecord)?;
        self.entries.put(&Self::entry_key(&permit.key), &bytes)?;
        permit.fulfilled = true;
        self.release(&permit.key);
        Ok(())
    }

    fn release(&self, key: &ActionKey) {
        if let Some(notify) = self.reservations.lock().remove(key) {
            notify.notify_waiters();
        }
    }

    pub fn blobs(&self) -> &BlobStore {
        &self.blobs
    }

    pub fn entries_root(&self) -> &Path {
        self.entries.root()
    }

    /// Evicts entries until total blob size is under `max_size_bytes`
    /// or there are no more evictable entries, oldest-`last_accessed`
    /// first (LRU), matching the default eviction policy in `spec.md`
    /// §4.D.
    pub fn evict_to_size(&self, max_size_bytes: u64) -> Result<Vec<ActionKey>, CacheError> {
        let mut records = self.all_entries()?;
        records.sort_by_key(|(_, e)| e.last_accessed);

        let mut total: u64 = records.iter().map(|(_, e)| e.size_bytes).sum();
        let mut evicted = Vec::new();
        for (key, entry) in records {
            if total <= max_size_bytes {
                break;
            }
            self.entries.delete(&Self::entry_key(&key))?;
            for digest in entry.output_hashes.values() {
                self.blobs.decrement_ref(digest)?;
            }
            total = total.saturating_sub(entry.size_bytes);
            evicted.push(key);
        }
        Ok(evicted)
    }

    /// Evicts any entry whose `created_at` is older than `max_age_secs`.
    pub fn evict_older_than(
        &self,
        now: u64,
        max_age_secs: u64,
    ) -> Result<Vec<ActionKey>, CacheError> {
        let mut evicted = Vec::new();
        for (key, entry) in self.all_entries()? {
            if now.saturating_sub(entry.created_at) > max_age_secs {
                self.entries.delete(&Self::entry_key(&key))?;
                for digest in entry.output_hashes.values() {
                    self.blobs.decrement_ref(digest)?;
                }
                evicted.push(key);
            }
        }
        Ok(evicted)
    }

    pub fn stats(&self) -> Result<CacheStats, CacheError> {
        let records = self.all_entries()?;
        let total_size_bytes = records.iter().map(|(_, e)| e.size_bytes).sum();
        let successes = records.iter().filter(|(_, e)| e.success).count();
        Ok(CacheStats {
            entry_count: records.len(),
            success_count: successes,
            failure_count: records.len() - successes,
            total_size_bytes,
        })
    }

    fn all_entries(&self) -> Result<Vec<(ActionKey, ActionEntry)>, CacheError> {
        let mut out = Vec::new();
        for (key_hex, payload, _meta) in self.entries.iter_entries()? {
            let digest: kiln_hash::Digest = match key_hex.parse() {
                Ok(d) => d,
                Err(_) => continue,
            };
            let entry: ActionEntry = match serde_json::from_slice(&payload) {
                Ok(e) => e,
                Err(_) => continue,
            };
            out.push((ActionKey(digest), entry));
        }
        Ok(out)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub entry_count: usize,
    pub success_count: usize,
    pub failure_count: usize,
    pub total_size_bytes: u64,
}

pub type CacheDir = PathBuf;

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_hash::Digest;
    use std::collections::BTreeMap;

    fn key(seed: u8) -> ActionKey {
        ActionKey(Digest([seed; 32]))
    }

    #[tokio::test]
    async fn missing_blob_demotes_a_hit_to_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ActionCache::open(dir.path()).unwrap();
        let k = key(3);

        let digest = kiln_hash::hash_bytes(b"output bytes");
        let mut outputs = BTreeMap::new();
        outputs.insert("out".to_string(), digest);

        let permit = match cache.reserve(&k, 0).await.unwrap() {
            Reservation::Build(p) => p,
            Reservation::Cached(_) => panic!("expected Build"),
        };
        cache
            .record(permit, ActionEntry::new_success(outputs, 12, 0))
            .unwrap();

        // The entry references a blob that was never written (or was
        // evicted out from under it) — must not be handed back as a hit.
        match cache.reserve(&k, 0).await.unwrap() {
            Reservation::Build(_) => {}
            Reservation::Cached(_) => panic!("entry with a missing blob must not be a hit"),
        }
    }

    #[tokio::test]
    async fn first_reserver_gets_build_permit_second_gets_cached_after_record() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ActionCache::open(dir.path()).unwrap();
        let k = key(1);

        let permit = match cache.reserve(&k, 100).await.unwrap() {
            Reservation::Build(p) => p,
            Reservation::Cached(_) => panic!("expected Build"),
        };

        let entry = ActionEntry::new_success(BTreeMap::new(), 10, 100);
        cache.record(permit, entry).unwrap();

        match cache.reserve(&k, 200).await.unwrap() {
            Reservation::Cached(e) => assert!(e.success),
            Reservation::Build(_) => panic!("expected Cached"),
        }
    }

    #[tokio::test]
    async fn concurrent_reservers_for_same_key_only_one_builds() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(ActionCache::open(dir.path()).unwrap());
        let k = key(2);

        let c1 = cache.clone();
        let k1 = k.clone();
        let builder = tokio::spawn(async move {
            let permit = match c1.reserve(&k1, 0).await.unwrap() {
                Reservation::Build(p) => p,
                Reservation::Cached(_) => panic!("expected Build"),
            };
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            c1.record(permit, ActionEntry::new_success(BTreeMap::new(), 1, 0))
                .unwrap();
        });

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        match cache.reserve(&k, 0).await.unwrap() {
            Reservation::Cached(e) => assert!(e.success),
            Reservation::Build(_) => panic!("waiter should have seen Cached after waiting"),
        }
        builder.await.unwrap();
    }

    #[test]
    fn evict_to_size_removes_oldest_first() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ActionCache::open(dir.path()).unwrap();

        for i in 0..3u8 {
            let permit = BuildPermit {
                key: key(i),
                reservations: cache.reservations.clone(),
                fulfilled: false,
            };
            let entry = ActionEntry::new_success(BTreeMap::new(), 100, i as u64);
            cache.record(permit, entry).unwrap();
        }

        let evicted = cache.evict_to_size(150).unwrap();
        assert!(evicted.contains(&key(0)));
        assert!(!evicted.contains(&key(2)));
    }

    #[test]
    fn stats_counts_success_and_failure() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ActionCache::open(dir.path()).unwrap();

        cache
            .record(
                BuildPermit {
                    key: key(1),
                    reservations: cache.reservations.clone(),
                    fulfilled: false,
                },
                ActionEntry::new_success(BTreeMap::new(), 10, 0),
            )
            .unwrap();
        cache
            .record(
                BuildPermit {
                    key: key(2),
                    reservations: cache.reservations.clone(),
                    fulfilled: false,
                },
                ActionEntry::new_failure(0),
            )
            .unwrap();

        let stats = cache.stats().unwrap();
        assert_eq!(stats.entry_count, 2);
        assert_eq!(stats.success_count, 1);
        assert_eq!(stats.failure_count, 1);
    }
}
