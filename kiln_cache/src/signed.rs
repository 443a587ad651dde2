//! On-disk framing for any persisted record (`spec.md` §3 `SignedRecord`):
//! `magic || version || len || payload || HMAC-BLAKE3(key, payload)`.
//!
//! Readers that detect a MAC mismatch delete the entry and report a miss —
//! they never surface payload bytes from a record that failed
//! verification (`spec.md` §4.B).

use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use kiln_hash::Digest;

use crate::error::CacheError;

const MAGIC: [u8; 4] = *b"KLN1";
const CURRENT_MAJOR_VERSION: u8 = 1;

/// The outcome of verifying a record read from disk.
pub enum VerifyOutcome {
    Ok(Vec<u8>),
    /// MAC mismatch — caller must treat this as a miss and delete the file.
    MacMismatch,
}

/// Frames `payload`, signed with `key`, into the on-disk byte layout.
pub fn frame(key: &[u8; 32], payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(4 + 1 + 4 + payload.len() + 32);
    buf.extend_from_slice(&MAGIC);
    buf.push(CURRENT_MAJOR_VERSION);
    buf.write_u32::<LittleEndian>(payload.len() as u32)
        .expect("write to Vec cannot fail");
    buf.extend_from_slice(payload);
    let mac = kiln_hash::keyed_hash(key, payload);
    buf.extend_from_slice(mac.as_bytes());
    buf
}

/// Parses and verifies a framed record. Readers tolerate unknown *minor*
/// versions (there are none yet, so any version byte differing in the
/// major component is rejected) and reject unknown major versions
/// (`spec.md` §6).
pub fn unframe(key: &[u8; 32], bytes: &[u8]) -> Result<VerifyOutcome, CacheError> {
    if bytes.len() < 4 + 1 + 4 + 32 {
        return Err(CacheError::MalformedRecord);
    }
    if bytes[0..4] != MAGIC {
        return Err(CacheError::MalformedRecord);
    }
    let version = bytes[4];
    if version != CURRENT_MAJOR_VERSION {
        return Err(CacheError::UnsupportedVersion {
            found: version,
            expected: CURRENT_MAJOR_VERSION,
        });
    }
    let mut len_bytes = &bytes[5..9];
    let len = len_bytes.read_u32::<LittleEndian>().unwrap() as usize;

    let payload_start = 9;
    let payload_end = payload_start + len;
    if bytes.len() != payload_end + 32 {
        return Err(CacheError::MalformedRecord);
    }

    let payload = &bytes[payload_start..payload_end];
    let mac_bytes = &bytes[payload_end..payload_end + 32];

    let expected = kiln_hash::keyed_hash(key, payload);
    if expected.as_bytes().as_slice() != mac_bytes {
        return Ok(VerifyOutcome::MacMismatch);
    }

    Ok(VerifyOutcome::Ok(payload.to_vec()))
}

/// Loads the HMAC key from `<cache_dir>/.signing_key`, generating and
/// persisting a fresh 32-byte key (with user-only permissions on Unix) on
/// first use. `spec.md` §9 leaves the bootstrap unspecified beyond
/// "generate on first use, store persistently, user-only permissions".
pub fn load_or_create_signing_key(cache_dir: &Path) -> Result<[u8; 32], CacheError> {
    if let Ok(hex_key) = std::env::var("BUILDER_CACHE_SIGNING_KEY") {
        let bytes = hex::decode(&hex_key).map_err(|_| CacheError::MalformedRecord)?;
        return <[u8; 32]>::try_from(bytes.as_slice()).map_err(|_| CacheError::MalformedRecord);
    }

    let key_path = cache_dir.join(".signing_key");

    if let Ok(bytes) = std::fs::read(&key_path) {
        if let Ok(key) = <[u8; 32]>::try_from(bytes.as_slice()) {
            return Ok(key);
        }
    }

    std::fs::create_dir_all(cache_dir).map_err(|e| io_err(&key_path, e))?;

    let mut key = [0u8; 32];
    rand::RngCore::fill_bytes(&mut rand::rngs::OsRng, &mut key);

    let tmp_path = cache_dir.join(".signing_key.tmp");
    std::fs::write(&tmp_path, key).map_err(|e| io_err(&tmp_path, e))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&tmp_path, std::fs::Permissions::from_mode(0o600))
            .map_err(|e| io_err(&tmp_path, e))?;
    }

    std::fs::rename(&tmp_path, &key_path).map_err(|e| io_err(&key_path, e))?;
    Ok(key)
}

fn io_err(path: &Path, source: std::io::Error) -> CacheError {
    CacheError::Io {
        path: path.display().to_string(),
        source,
    }
}

/// Digest-keyed convenience used by higher layers that already hold an
/// [`kiln_hash::Digest`] signing key.
pub fn key_as_digest(key: &[u8; 32]) -> Digest {
    Digest(*key)
}
