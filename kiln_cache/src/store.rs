//! Hash-prefixed on-disk key/value store used by both the action-entry
//! index and the blob store (`spec.md` §6 on-disk layout).
//!
//! Writes land in a temp file beside the target and are renamed into
//! place, so a crash mid-write never leaves a partially-written record
//! visible to readers.

use std::path::{Path, PathBuf};

use crate::error::CacheError;
use crate::signed;

/// Outcome of a checked read, distinguishing "never written" from "MAC
/// verification failed" so callers can tell an ordinary miss from a
/// tampered record.
pub enum GetOutcome {
    Found(Vec<u8>),
    NotFound,
    Tampered,
}

/// A directory-backed store keyed by a hex digest, signing every record
/// with the cache's HMAC key before it touches disk.
pub struct SignedStore {
    root: PathBuf,
    signing_key: [u8; 32],
}

impl SignedStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|e| io_err(&root, e))?;
        let signing_key = signed::load_or_create_signing_key(&root)?;
        Ok(Self { root, signing_key })
    }

    /// Splits `key` into a two-character shard prefix and the remainder,
    /// mirroring git's object store layout to keep any one directory
    /// from accumulating too many entries.
    fn path_for(&self, key: &str) -> PathBuf {
        let (shard, rest) = key.split_at(2.min(key.len()));
        self.root.join(shard).join(rest)
    }

    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        match self.get_checked(key)? {
            GetOutcome::Found(payload) => Ok(Some(payload)),
            GetOutcome::NotFound | GetOutcome::Tampered => Ok(None),
        }
    }

    /// Like [`Self::get`], but distinguishes a record that was never
    /// written from one whose MAC failed to verify, so callers can raise
    /// a tamper warning instead of treating both as an ordinary miss.
    pub fn get_checked(&self, key: &str) -> Result<GetOutcome, CacheError> {
        let path = self.path_for(key);
        let bytes = match std::fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(GetOutcome::NotFound),
            Err(e) => return Err(io_err(&path, e)),
        };
        match signed::unframe(&self.signing_key, &bytes)? {
            signed::VerifyOutcome::Ok(payload) => Ok(GetOutcome::Found(payload)),
            signed::VerifyOutcome::MacMismatch => {
                let _ = std::fs::remove_file(&path);
                Ok(GetOutcome::Tampered)
            }
        }
    }

    pub fn put(&self, key: &str, payload: &[u8]) -> Result<(), CacheError> {
        let path = self.path_for(key);
        let dir = path.parent().expect("path_for always has a parent");
        std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;

        let framed = signed::frame(&self.signing_key, payload);
        let tmp_path = dir.join(format!(".{}.tmp.{}", key, std::process::id()));
        std::fs::write(&tmp_path, &framed).map_err(|e| io_err(&tmp_path, e))?;
        std::fs::rename(&tmp_path, &path).map_err(|e| io_err(&path, e))?;
        Ok(())
    }

    pub fn delete(&self, key: &str) -> Result<(), CacheError> {
        let path = self.path_for(key);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_err(&path, e)),
        }
    }

    pub fn exists(&self, key: &str) -> bool {
        self.path_for(key).exists()
    }

    /// Walks every record under the store root, returning `(key,
    /// payload, metadata)` for records whose MAC still verifies.
    /// Corrupt records are deleted as they are encountered, not
    /// returned.
    pub fn iter_entries(&self) -> Result<Vec<(String, Vec<u8>, std::fs::Metadata)>, CacheError> {
        let mut out = Vec::new();
        self.walk(&self.root, &mut out)?;
        Ok(out)
    }

    fn walk(
        &self,
        dir: &Path,
        out: &mut Vec<(String, Vec<u8>, std::fs::Metadata)>,
    ) -> Result<(), CacheError> {
        let entries = match std::fs::read_dir(dir) {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(io_err(dir, e)),
        };
        for entry in entries {
            let entry = entry.map_err(|e| io_err(dir, e))?;
            let path = entry.path();
            let file_type = entry.file_type().map_err(|e| io_err(&path, e))?;
            if file_type.is_dir() {
                self.walk(&path, out)?;
                continue;
            }
            let file_name = entry.file_name();
            let name = file_name.to_string_lossy();
            if name.starts_with('.') {
                continue;
            }
            let shard = path
                .parent()
                .and_then(|p| p.file_name())
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_default();
            let key = format!("{shard}{name}");

            let bytes = std::fs::read(&path).map_err(|e| io_err(&path, e))?;
            let metadata = entry.metadata().map_err(|e| io_err(&path, e))?;
            match signed::unframe(&self.signing_key, &bytes)? {
                signed::VerifyOutcome::Ok(payload) => out.push((key, payload, metadata)),
                signed::VerifyOutcome::MacMismatch => {
                    let _ = std::fs::remove_file(&path);
                }
            }
        }
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

fn io_err(path: &Path, source: std::io::Error) -> CacheError {
    CacheError::Io {
        path: path.display().to_string(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_get_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let store = SignedStore::open(dir.path().join("store")).unwrap();
        store.put("abcd1234", b"payload one").unwrap();
        assert_eq!(store.get("abcd1234").unwrap().unwrap(), b"payload one");
    }

    #[test]
    fn missing_key_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = SignedStore::open(dir.path().join("store")).unwrap();
        assert!(store.get("nosuchkey").unwrap().is_none());
    }

    #[test]
    fn get_checked_distinguishes_not_found_from_tampered() {
        let dir = tempfile::tempdir().unwrap();
        let store = SignedStore::open(dir.path().join("store")).unwrap();
        assert!(matches!(
            store.get_checked("nosuchkey").unwrap(),
            GetOutcome::NotFound
        ));

        store.put("abcd1234", b"payload").unwrap();
        let path = store.path_for("abcd1234");
        let mut bytes = std::fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        std::fs::write(&path, bytes).unwrap();

        assert!(matches!(
            store.get_checked("abcd1234").unwrap(),
            GetOutcome::Tampered
        ));
    }

    #[test]
    fn delete_removes_entry() {
        let dir = tempfile::tempdir().unwrap();
        let store = SignedStore::open(dir.path().join("store")).unwrap();
        store.put("abcd1234", b"x").unwrap();
        store.delete("abcd1234").unwrap();
        assert!(store.get("abcd1234").unwrap().is_none());
    }

    #[test]
    fn tampered_record_reads_as_miss_and_is_removed() {
        let dir = tempfile::tempdir().unwrap();
        let store = SignedStore::open(dir.path().join("store")).unwrap();
        store.put("abcd1234", b"payload").unwrap();
        let path = store.path_for("abcd1234");
        let mut bytes = std::fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        std::fs::write(&path, bytes).unwrap();

        assert!(store.get("abcd1234").unwrap().is_none());
        assert!(!path.exists());
    }

    #[test]
    fn iter_entries_finds_all_valid_records() {
        let dir = tempfile::tempdir().unwrap();
        let store = SignedStore::open(dir.path().join("store")).unwrap();
        store.put("aabbccdd", b"one").unwrap();
        store.put("aabbeeff", b"two").unwrap();
        store.put("11223344", b"three").unwrap();

        let entries = store.iter_entries().unwrap();
        assert_eq!(entries.len(), 3);
    }

    #[test]
    fn reopening_store_reuses_signing_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store");
        {
            let store = SignedStore::open(&path).unwrap();
            store.put("abcd1234", b"payload").unwrap();
        }
        let store = SignedStore::open(&path).unwrap();
        assert_eq!(store.get("abcd1234").unwrap().unwrap(), b"payload");
    }
}
