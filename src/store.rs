//! Local collection storage.
//!
//! Each collection is one JSON array on disk:
//! ```text
//! <DATA_DIR>/
//!   customers.json
//!   projects.json
//!   materials.json
//!   quotes.json
//!   invoices.json
//! ```
//!
//! Writes replace the whole file atomically (temp file + rename), so a
//! reader sees either the previous or the new collection, never a partial one.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use uuid::Uuid;

use crate::models::{Collection, Record};

/// Read/write access to named collections.
///
/// The sync engine only talks to storage through this trait.
pub trait CollectionStore: Send + Sync {
    /// Reads a collection. A collection that was never written is empty.
    fn read(&self, collection: Collection) -> Result<Vec<Record>, StoreError>;

    /// Replaces a collection with `records`.
    fn write(&self, collection: Collection, records: &[Record]) -> Result<(), StoreError>;
}

/// Errors that can occur while reading or writing stored JSON.
#[derive(Debug)]
pub enum StoreError {
    /// I/O error reading or writing a file.
    IoError(PathBuf, io::Error),
    /// File exists but is not valid JSON of the expected shape.
    ParseError(PathBuf, serde_json::Error),
    /// Failed to serialize data before writing.
    SerializeError(serde_json::Error),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::IoError(path, e) => {
                write!(f, "I/O error for {}: {}", path.display(), e)
            }
            StoreError::ParseError(path, e) => {
                write!(f, "Failed to parse {}: {}", path.display(), e)
            }
            StoreError::SerializeError(e) => write!(f, "Failed to serialize data: {}", e),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::IoError(_, e) => Some(e),
            StoreError::ParseError(_, e) => Some(e),
            StoreError::SerializeError(e) => Some(e),
        }
    }
}

/// Writes `bytes` to `path` atomically.
///
/// Each call uses its own temp file so concurrent writers never clobber each
/// other's partial output; the last rename wins.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| StoreError::IoError(parent.to_path_buf(), e))?;
    }

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp_path = path.with_file_name(format!(".{}.{}.tmp", file_name, Uuid::new_v4()));

    let result = (|| {
        let mut file = File::create(&temp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(&temp_path, path)
    })();

    if let Err(e) = result {
        let _ = fs::remove_file(&temp_path);
        return Err(StoreError::IoError(path.to_path_buf(), e));
    }

    Ok(())
}

/// File-backed collection store.
#[derive(Debug, Clone)]
pub struct FileStore {
    data_dir: PathBuf,
}

impl FileStore {
    /// Creates a new file store rooted at `data_dir`.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Returns the full path for a collection file.
    pub fn path(&self, collection: Collection) -> PathBuf {
        self.data_dir.join(collection.filename())
    }

    /// Checks if a collection has been written.
    pub fn exists(&self, collection: Collection) -> bool {
        self.path(collection).exists()
    }
}

impl CollectionStore for FileStore {
    fn read(&self, collection: Collection) -> Result<Vec<Record>, StoreError> {
        let path = self.path(collection);

        match fs::read(&path) {
            Ok(bytes) => {
                serde_json::from_slice(&bytes).map_err(|e| StoreError::ParseError(path, e))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(StoreError::IoError(path, e)),
        }
    }

    fn write(&self, collection: Collection, records: &[Record]) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(records).map_err(StoreError::SerializeError)?;
        write_atomic(&self.path(collection), &bytes)
    }
}

/// In-memory store, used for ephemeral nodes and tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<Collection, Vec<Record>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CollectionStore for MemoryStore {
    fn read(&self, collection: Collection) -> Result<Vec<Record>, StoreError> {
        let collections = self
            .collections
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(collections.get(&collection).cloned().unwrap_or_default())
    }

    fn write(&self, collection: Collection, records: &[Record]) -> Result<(), StoreError> {
        let mut collections = self
            .collections
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        collections.insert(collection, records.to_vec());
        Ok(())
    }
}
