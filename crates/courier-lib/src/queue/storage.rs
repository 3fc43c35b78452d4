//! Durable storage boundary for the request queue
//!
//! Any key-value persistence satisfies [`Storage`]. Two implementations ship:
//! - [`MemoryStorage`] for tests and ephemeral hosts
//! - [`FileStorage`], one file per key, written atomically via temp file + rename

use crate::error::StorageError;
use dashmap::DashMap;
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Key-value persistence consumed by the queue
pub trait Storage: Send + Sync {
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;
    fn save(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError>;
    fn delete(&self, key: &str) -> Result<(), StorageError>;
}

/// In-memory storage
#[derive(Debug, Default)]
pub struct MemoryStorage {
    values: DashMap<String, Vec<u8>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }
}

impl Storage for MemoryStorage {
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.values.get(key).map(|v| v.clone()))
    }

    fn save(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError> {
        self.values.insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.values.remove(key);
        Ok(())
    }
}

/// Storage whose writes always fail, for exercising save-error paths
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct ReadOnlyStorage;

#[cfg(test)]
impl Storage for ReadOnlyStorage {
    fn load(&self, _key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(None)
    }

    fn save(&self, _key: &str, _bytes: &[u8]) -> Result<(), StorageError> {
        Err(std::io::Error::new(ErrorKind::PermissionDenied, "read-only storage").into())
    }

    fn delete(&self, _key: &str) -> Result<(), StorageError> {
        Ok(())
    }
}

/// File-backed storage rooted at a directory
#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
            && !key.starts_with('.');
        if !valid {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.dir.join(format!("{}.json", key)))
    }
}

impl Storage for FileStorage {
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let path = self.path_for(key)?;
        match std::fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        std::fs::create_dir_all(&self.dir)?;

        let temp_path = path.with_extension("tmp");
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;

        std::fs::rename(&temp_path, &path)?;
        debug!(path = %path.display(), bytes = bytes.len(), "Stored value");
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_memory_storage() {
        let storage = MemoryStorage::new();
        assert!(storage.load("queue").unwrap().is_none());

        storage.save("queue", b"[]").unwrap();
        assert_eq!(storage.load("queue").unwrap(), Some(b"[]".to_vec()));

        storage.delete("queue").unwrap();
        assert!(!storage.contains("queue"));
    }

    #[test]
    fn test_file_storage_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let storage = FileStorage::new(temp_dir.path().join("nested"));

        assert!(storage.load("courier_offline_queue").unwrap().is_none());

        storage.save("courier_offline_queue", b"[1,2,3]").unwrap();
        assert!(temp_dir
            .path()
            .join("nested/courier_offline_queue.json")
            .exists());
        assert!(!temp_dir
            .path()
            .join("nested/courier_offline_queue.tmp")
            .exists());

        let loaded = storage.load("courier_offline_queue").unwrap();
        assert_eq!(loaded, Some(b"[1,2,3]".to_vec()));

        storage.delete("courier_offline_queue").unwrap();
        storage.delete("courier_offline_queue").unwrap();
        assert!(storage.load("courier_offline_queue").unwrap().is_none());
    }

    #[test]
    fn test_file_storage_rejects_path_keys() {
        let temp_dir = TempDir::new().unwrap();
        let storage = FileStorage::new(temp_dir.path());

        for key in ["", "../escape", "a/b", ".hidden"] {
            assert!(matches!(
                storage.save(key, b"x"),
                Err(StorageError::InvalidKey(_))
            ));
        }
    }
}
