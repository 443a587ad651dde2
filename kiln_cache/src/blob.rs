//! Content-addressed artifact storage, `blobs/<first-byte-hex>/<rest>`
//! (`spec.md` §6). Blobs are reference-counted so an output shared by
//! several cached actions is only evicted once nothing points to it.

use std::path::{Path, PathBuf};

use kiln_hash::Digest;

use crate::error::CacheError;

pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|e| io_err(&root, e))?;
        Ok(Self { root })
    }

    fn path_for(&self, digest: &Digest) -> PathBuf {
        self.root.join(digest.hex_prefix()).join(digest.hex_rest())
    }

    fn refcount_path(&self, digest: &Digest) -> PathBuf {
        self.root
            .join(digest.hex_prefix())
            .join(format!("{}.refs", digest.hex_rest()))
    }

    /// Stores `bytes` under its content digest if not already present,
    /// and increments its reference count. Returns the digest.
    pub fn put(&self, bytes: &[u8]) -> Result<Digest, CacheError> {
        let digest = kiln_hash::hash_bytes(bytes);
        let path = self.path_for(&digest);
        if !path.exists() {
            let dir = path.parent().expect("path_for always has a parent");
            std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
            let tmp = dir.join(format!(".{}.tmp.{}", digest.hex_rest(), std::process::id()));
            std::fs::write(&tmp, bytes).map_err(|e| io_err(&tmp, e))?;
            std::fs::rename(&tmp, &path).map_err(|e| io_err(&path, e))?;
        }
        self.increment_ref(&digest)?;
        Ok(digest)
    }

    pub fn get(&self, digest: &Digest) -> Result<Vec<u8>, CacheError> {
        let path = self.path_for(digest);
        std::fs::read(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                CacheError::BlobMissing(digest.to_hex())
            } else {
                io_err(&path, e)
            }
        })
    }

    pub fn contains(&self, digest: &Digest) -> bool {
        self.path_for(digest).exists()
    }

    pub fn size_of(&self, digest: &Digest) -> Result<u64, CacheError> {
        let path = self.path_for(digest);
        std::fs::metadata(&path)
            .map(|m| m.len())
            .map_err(|e| io_err(&path, e))
    }

    fn read_refcount(&self, digest: &Digest) -> u64 {
        std::fs::read_to_string(self.refcount_path(digest))
            .ok()
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(0)
    }

    fn write_refcount(&self, digest: &Digest, count: u64) -> Result<(), CacheError> {
        let path = self.refcount_path(digest);
        std::fs::write(&path, count.to_string()).map_err(|e| io_err(&path, e))
    }

    pub fn increment_ref(&self, digest: &Digest) -> Result<u64, CacheError> {
        let count = self.read_refcount(digest) + 1;
        self.write_refcount(digest, count)?;
        Ok(count)
    }

    /// Decrements the blob's reference count, deleting the blob and its
    /// refcount file once it reaches zero. Returns `true` if the blob
    /// was deleted.
    pub fn decrement_ref(&self, digest: &Digest) -> Result<bool, CacheError> {
        let count = self.read_refcount(digest).saturating_sub(1);
        if count == 0 {
            let path = self.path_for(digest);
            if path.exists() {
                std::fs::remove_file(&path).map_err(|e| io_err(&path, e))?;
            }
            let refs = self.refcount_path(digest);
            let _ = std::fs::remove_file(&refs);
            Ok(true)
        } else {
            self.write_refcount(digest, count)?;
            Ok(false)
        }
    }
}

fn io_err(path: &Path, source: std::io::Error) -> CacheError {
    CacheError::Io {
        path: path.display().to_string(),
        source,
    }
}
