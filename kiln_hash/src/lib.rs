//! Stable, streaming content hashing over bytes, files, and string sequences.
//!
//! Every digest in kiln is BLAKE3-256, represented as 32 raw bytes with a
//! hex `Display`/`FromStr` pair for use in paths and cache keys. File
//! hashing uses a size-tiered strategy purely as a latency optimization —
//! the digest produced is identical regardless of which tier was taken.

use std::fmt;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

/// Files at or under this size are read in one `std::fs::read` call and
/// hashed in a single `update`. Larger files are streamed in fixed blocks
/// so hashing never holds an entire large file in memory at once.
pub const SMALL_FILE_THRESHOLD: u64 = 128 * 1024;

/// Block size used when streaming a large file through the hasher.
pub const STREAM_BLOCK_SIZE: usize = 64 * 1024;

/// A 32-byte BLAKE3 digest.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct Digest(#[serde(with = "digest_serde")] pub [u8; 32]);

mod digest_serde {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8; 32], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 32], D::Error> {
        let s = String::deserialize(d)?;
        let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("digest must be 32 bytes"))
    }
}

/// The digest of the empty byte sequence, used for targets with zero
/// declared inputs (`spec.md` §8 boundary behavior).
pub const EMPTY_DIGEST: Digest = Digest([
    0xaf, 0x13, 0x49, 0xb9, 0xf5, 0xf9, 0xa1, 0xa6, 0xa0, 0x40, 0x4d, 0xea, 0x36, 0xdc, 0xc9, 0x49,
    0x9b, 0xcb, 0x25, 0xc9, 0xad, 0xc1, 0x12, 0xb7, 0xcc, 0x9a, 0x93, 0xca, 0xe4, 0x1f, 0x32, 0x62,
]);

impl Digest {
    pub fn from_hash(hash: blake3::Hash) -> Self {
        Digest(*hash.as_bytes())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// First two hex characters, used as the blob-store directory prefix
    /// (`blobs/<first-two-hex>/<rest-of-hex>` per `spec.md` §6).
    pub fn hex_prefix(&self) -> String {
        hex::encode(&self.0[..1])
    }

    pub fn hex_rest(&self) -> String {
        hex::encode(&self.0[1..])
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self.to_hex())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HashError {
    #[error("invalid digest hex string: {0}")]
    InvalidHex(String),
    #[error("io error hashing {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl FromStr for Digest {
    type Err = HashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|_| HashError::InvalidHex(s.to_owned()))?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| HashError::InvalidHex(s.to_owned()))?;
        Ok(Digest(arr))
    }
}

/// Hash a byte slice.
pub fn hash_bytes(bytes: &[u8]) -> Digest {
    Digest::from_hash(blake3::hash(bytes))
}

/// Hash a file's contents, streaming large files in fixed-size blocks.
///
/// The resulting digest is identical to `hash_bytes(&std::fs::read(path)?)`
/// for any file; the tiering only changes how much memory is used to get
/// there.
pub fn hash_file(path: &Path) -> Result<Digest, HashError> {
    let meta = std::fs::metadata(path).map_err(|e| io_err(path, e))?;
    if meta.len() <= SMALL_FILE_THRESHOLD {
        let bytes = std::fs::read(path).map_err(|e| io_err(path, e))?;
        return Ok(hash_bytes(&bytes));
    }

    let file = std::fs::File::open(path).map_err(|e| io_err(path, e))?;
    let mut reader = std::io::BufReader::with_capacity(STREAM_BLOCK_SIZE, file);
    let mut hasher = blake3::Hasher::new();
    let mut buf = vec![0u8; STREAM_BLOCK_SIZE];
    loop {
        let n = reader.read(&mut buf).map_err(|e| io_err(path, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(Digest::from_hash(hasher.finalize()))
}

fn io_err(path: &Path, source: std::io::Error) -> HashError {
    HashError::Io {
        path: path.display().to_string(),
        source,
    }
}

/// Hash an ordered sequence of strings. Each element is length-prefixed (as
/// a little-endian `u64`) before being folded into the hasher so that
/// `["ab", "c"]` and `["a", "bc"]` never collide.
pub fn hash_sequence<S: AsRef<str>>(seq: impl IntoIterator<Item = S>) -> Digest {
    let mut hasher = blake3::Hasher::new();
    for item in seq {
        let s = item.as_ref();
        hasher.update(&(s.len() as u64).to_le_bytes());
        hasher.update(s.as_bytes());
    }
    Digest::from_hash(hasher.finalize())
}

/// Hash an ordered list of files by path, producing one digest over all of
/// their contents in order. Used by action identity (`spec.md` §4.C) to
/// fingerprint a target's declared inputs.
pub fn hash_files_ordered<P: AsRef<Path>>(paths: &[P]) -> Result<Digest, HashError> {
    let mut hasher = blake3::Hasher::new();
    for p in paths {
        let d = hash_file(p.as_ref())?;
        hasher.update(d.as_bytes());
    }
    Ok(Digest::from_hash(hasher.finalize()))
}

/// Keyed BLAKE3 hash, used as the MAC for [`SignedRecord`]-style framing in
/// `kiln_cache`. Exposed here so the cache crate doesn't need its own
/// hashing dependency.
pub fn keyed_hash(key: &[u8; 32], payload: &[u8]) -> Digest {
    Digest::from_hash(blake3::keyed_hash(key, payload))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_bytes_match_known_constant() {
        assert_eq!(hash_bytes(&[]), EMPTY_DIGEST);
    }

    #[test]
    fn hex_roundtrip() {
        let d = hash_bytes(b"hello kiln");
        let s = d.to_hex();
        let back: Digest = s.parse().unwrap();
        assert_eq!(d, back);
    }

    #[test]
    fn small_and_large_tier_agree() {
        let data: Vec<u8> = (0..(SMALL_FILE_THRESHOLD as usize * 3))
            .map(|i| (i % 251) as u8)
            .collect();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.bin");
        std::fs::write(&path, &data).unwrap();

        let streamed = hash_file(&path).unwrap();
        let whole = hash_bytes(&data);
        assert_eq!(streamed, whole);
    }

    #[test]
    fn sequence_hash_distinguishes_split_point() {
        let a = hash_sequence(["ab", "c"]);
        let b = hash_sequence(["a", "bc"]);
        assert_ne!(a, b);
    }

    #[test]
    fn sequence_hash_is_order_sensitive() {
        let a = hash_sequence(["a", "b"]);
        let b = hash_sequence(["b", "a"]);
        assert_ne!(a, b);
    }

    #[test]
    fn files_ordered_matches_manual_fold() {
        let dir = tempfile::tempdir().unwrap();
        let p1 = dir.path().join("a.txt");
        let p2 = dir.path().join("b.txt");
        std::fs::write(&p1, b"one").unwrap();
        std::fs::write(&p2, b"two").unwrap();

        let combined = hash_files_ordered(&[&p1, &p2]).unwrap();
        let reordered = hash_files_ordered(&[&p2, &p1]).unwrap();
        assert_ne!(combined, reordered);
    }

    #[test]
    fn keyed_hash_changes_with_key() {
        let k1 = [1u8; 32];
        let k2 = [2u8; 32];
        let payload = b"entry bytes";
        assert_ne!(keyed_hash(&k1, payload), keyed_hash(&k2, payload));
    }

    #[test]
    fn invalid_hex_is_rejected() {
        assert!("not-hex".parse::<Digest>().is_err());
    }
}
