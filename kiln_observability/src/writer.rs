//! Persists [`HealthCheckpoint`] history to `<cache_dir>/health/` as the
//! optional checkpoint history named in `spec.md` §6. Plain JSON, not
//! wrapped in `SignedRecord` — health data is diagnostic, not trusted
//! cache state.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::health::HealthCheckpoint;

pub struct CheckpointWriter {
    dir: PathBuf,
}

impl CheckpointWriter {
    pub fn open(cache_dir: impl AsRef<Path>) -> io::Result<Self> {
        let dir = cache_dir.as_ref().join("health");
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Writes one checkpoint, named by its timestamp so history sorts by
    /// filename. Writes via temp-file-then-rename to avoid readers ever
    /// observing a partial write, matching the rest of the workspace's
    /// on-disk writers.
    pub fn write(&self, checkpoint: &HealthCheckpoint) -> io::Result<PathBuf> {
        let path = self
            .dir
            .join(format!("{}.json", checkpoint.timestamp_unix_secs));
        let tmp_path = self.dir.join(format!(".{}.json.tmp", checkpoint.timestamp_unix_secs));

        let body = serde_json::to_vec_pretty(checkpoint)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        fs::write(&tmp_path, &body)?;
        fs::rename(&tmp_path, &path)?;
        Ok(path)
    }

    pub fn history(&self) -> io::Result<Vec<HealthCheckpoint>> {
        let mut entries = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let body = fs::read(&path)?;
            if let Ok(checkpoint) = serde_json::from_slice::<HealthCheckpoint>(&body) {
                entries.push(checkpoint);
            }
        }
        entries.sort_by_key(|c| c.timestamp_unix_secs);
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_history_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let writer = CheckpointWriter::open(dir.path()).unwrap();

        let c1 = HealthCheckpoint::new(100, 1.0, 0.5, 10, 3, 0);
        let c2 = HealthCheckpoint::new(200, 2.0, 0.8, 10, 10, 0);
        writer.write(&c1).unwrap();
        writer.write(&c2).unwrap();

        let history = writer.history().unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].timestamp_unix_secs, 100);
        assert_eq!(history[1].timestamp_unix_secs, 200);
    }
}
