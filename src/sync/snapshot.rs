//! The snapshot file shared between nodes, usually on a network share.
//!
//! ```text
//! <SHARED_PATH>/
//!   shared-data.json
//!   backups/
//!     datashare-backup-20240501-101500.json
//! ```

use chrono::{DateTime, Utc};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::models::Snapshot;
use crate::store::{write_atomic, StoreError};

pub const SNAPSHOT_FILENAME: &str = "shared-data.json";
pub const BACKUP_DIR: &str = "backups";

/// Handle to the shared snapshot location.
#[derive(Debug, Clone)]
pub struct SharedSnapshot {
    dir: PathBuf,
}

impl SharedSnapshot {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Full path of the snapshot file.
    pub fn path(&self) -> PathBuf {
        self.dir.join(SNAPSHOT_FILENAME)
    }

    /// Reads the current snapshot.
    ///
    /// A missing file means no node has exported yet, and a corrupt one is
    /// skipped; both return `Ok(None)`. Other I/O failures (share offline,
    /// permission denied) are errors.
    pub fn read(&self) -> Result<Option<Snapshot>, StoreError> {
        let path = self.path();

        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::IoError(path, e)),
        };

        match serde_json::from_slice(&bytes) {
            Ok(snapshot) => Ok(Some(snapshot)),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Skipping corrupt snapshot file");
                Ok(None)
            }
        }
    }

    /// Atomically replaces the snapshot file.
    pub fn write(&self, snapshot: &Snapshot) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(snapshot).map_err(StoreError::SerializeError)?;
        write_atomic(&self.path(), &bytes)
    }

    /// Writes `snapshot` to a timestamped file under `backups/` and returns
    /// its path.
    pub fn write_backup(
        &self,
        snapshot: &Snapshot,
        now: DateTime<Utc>,
    ) -> Result<PathBuf, StoreError> {
        let path = backup_path(&self.dir, now);
        let bytes = serde_json::to_vec_pretty(snapshot).map_err(StoreError::SerializeError)?;
        write_atomic(&path, &bytes)?;
        Ok(path)
    }
}

/// Path of the backup file written at `now` under `root`.
pub fn backup_path(root: &Path, now: DateTime<Utc>) -> PathBuf {
    root.join(BACKUP_DIR).join(format!(
        "datashare-backup-{}.json",
        now.format("%Y%m%d-%H%M%S")
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Collection, NodeMode, Record};
    use chrono::TimeZone;
    use serde_json::json;
    use tempfile::TempDir;

    fn setup() -> (SharedSnapshot, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        (SharedSnapshot::new(temp_dir.path()), temp_dir)
    }

    fn sample() -> Snapshot {
        let mut snapshot = Snapshot::new(NodeMode::Master, "node-a", Utc::now());
        let record: Record =
            serde_json::from_value(json!({"id": "1", "updatedAt": "2024-01-01T00:00:00.000Z"}))
                .unwrap();
        snapshot.insert(Collection::Customers, vec![record]);
        snapshot
    }

    #[test]
    fn test_read_missing_file() {
        let (shared, _temp) = setup();
        assert!(shared.read().unwrap().is_none());
    }

    #[test]
    fn test_write_then_read() {
        let (shared, _temp) = setup();
        let snapshot = sample();

        shared.write(&snapshot).unwrap();

        assert_eq!(shared.read().unwrap(), Some(snapshot));
    }

    #[test]
    fn test_corrupt_file_is_skipped() {
        let (shared, _temp) = setup();
        fs::write(shared.path(), b"{\"customers\": [").unwrap();

        assert!(shared.read().unwrap().is_none());
    }

    #[test]
    fn test_unreadable_share_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        // A regular file where the share directory should be.
        let blocker = temp_dir.path().join("share");
        fs::write(&blocker, b"").unwrap();
        let shared = SharedSnapshot::new(&blocker);

        assert!(shared.read().is_err());
        assert!(shared.write(&sample()).is_err());
    }

    #[test]
    fn test_write_backup() {
        let (shared, temp) = setup();
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 10, 15, 0).unwrap();

        let snapshot = sample();

        let path = shared.write_backup(&snapshot, now).unwrap();

        assert_eq!(
            path,
            temp.path()
                .join("backups")
                .join("datashare-backup-20240501-101500.json")
        );
        let contents: Snapshot = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(contents, snapshot);
        assert!(!shared.path().exists());
    }
}
