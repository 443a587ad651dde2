//! `CacheError` / `IntegrityError` (`spec.md` §7).

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("io error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("MAC mismatch for key {0}")]
    MacMismatch(String),
    #[error("record is truncated or malformed")]
    MalformedRecord,
    #[error("unsupported record major version {found}, expected {expected}")]
    UnsupportedVersion { found: u8, expected: u8 },
    #[error("blob missing for hash {0}")]
    BlobMissing(String),
    #[error("disk full or write failed: {0}")]
    WriteFailed(String),
    #[error(transparent)]
    Integrity(#[from] IntegrityError),
}

#[derive(Debug, thiserror::Error)]
pub enum IntegrityError {
    #[error("output hash mismatch for {path}: expected {expected}, found {found}")]
    HashMismatch {
        path: String,
        expected: String,
        found: String,
    },
}
