use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::{check_quota, entry_bytes, KeyValueStorage, StorageError};
use crate::sync::lock;

/// Durable storage in a single JSON object file (`{"key": "value", ...}`).
///
/// Every mutation rewrites the whole file through a temp file and rename, so a
/// crash mid-write leaves the previous index intact.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    quota_bytes: Option<usize>,
    /// Serializes read-modify-write cycles within this process
    io_lock: Mutex<()>,
}

impl FileStorage {
    /// Open (or lazily create) the index file at `path`
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        Ok(Self {
            path,
            quota_bytes: None,
            io_lock: Mutex::new(()),
        })
    }

    /// Limit the total stored bytes (key + value per entry)
    pub fn with_quota(mut self, quota_bytes: Option<usize>) -> Self {
        self.quota_bytes = quota_bytes;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_index(&self) -> Result<BTreeMap<String, String>, StorageError> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }

        let contents = fs::read_to_string(&self.path)?;
        if contents.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        Ok(serde_json::from_str(&contents)?)
    }

    fn write_index(&self, index: &BTreeMap<String, String>) -> Result<(), StorageError> {
        let contents = serde_json::to_string_pretty(index)?;
        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, contents)?;
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

impl KeyValueStorage for FileStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let _guard = lock(&self.io_lock);
        Ok(self.read_index()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let _guard = lock(&self.io_lock);
        let mut index = self.read_index()?;

        let total: usize = index.iter().map(|(k, v)| entry_bytes(k, v)).sum();
        check_quota(
            self.quota_bytes,
            total,
            key,
            index.get(key).map(String::as_str),
            value,
        )?;

        index.insert(key.to_string(), value.to_string());
        self.write_index(&index)
    }

    fn delete(&self, key: &str) -> Result<(), StorageError> {
        let _guard = lock(&self.io_lock);
        let mut index = self.read_index()?;
        if index.remove(key).is_some() {
            self.write_index(&index)?;
        }
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StorageError> {
        let _guard = lock(&self.io_lock);
        Ok(self.read_index()?.into_keys().collect())
    }
}
