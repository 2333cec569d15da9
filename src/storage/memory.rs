use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use super::{check_quota, entry_bytes, KeyValueStorage, StorageError};
use crate::sync::lock;

/// A physical write observed by [`MemoryStorage`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageWrite {
    pub key: String,
    pub value: String,
}

/// In-process storage. Clones share the same entries, so a "reload" in tests
/// is simply a second consumer built on a clone of the same store.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    entries: Arc<Mutex<HashMap<String, String>>>,
    quota_bytes: Option<usize>,
    unavailable: Arc<AtomicBool>,
    write_log: Option<Arc<Mutex<Vec<StorageWrite>>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that rejects writes growing it past `quota_bytes`
    pub fn with_quota(quota_bytes: usize) -> Self {
        Self {
            quota_bytes: Some(quota_bytes),
            ..Self::default()
        }
    }

    /// Keep a log of every successful `set` for [`Self::writes`].
    ///
    /// Off by default; the log is never trimmed.
    pub fn recording(mut self) -> Self {
        self.write_log = Some(Arc::default());
        self
    }

    /// Simulate the medium disappearing (private browsing, revoked permission)
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Seed a raw value without recording it in the write log
    pub fn insert_raw(&self, key: &str, value: &str) {
        lock(&self.entries).insert(key.to_string(), value.to_string());
    }

    /// Raw value currently stored under `key`
    pub fn raw(&self, key: &str) -> Option<String> {
        lock(&self.entries).get(key).cloned()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        lock(&self.entries).contains_key(key)
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every successful `set`, in order. Empty unless built with [`Self::recording`]
    pub fn writes(&self) -> Vec<StorageWrite> {
        self.write_log
            .as_ref()
            .map(|log| lock(log).clone())
            .unwrap_or_default()
    }

    /// Successful `set` calls for one key, in order
    pub fn writes_for(&self, key: &str) -> Vec<StorageWrite> {
        self.writes().into_iter().filter(|w| w.key == key).collect()
    }

    fn ensure_available(&self) -> Result<(), StorageError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable(
                "in-memory storage disabled".to_string(),
            ));
        }
        Ok(())
    }
}

impl KeyValueStorage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.ensure_available()?;
        Ok(lock(&self.entries).get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.ensure_available()?;

        let mut entries = lock(&self.entries);
        let total: usize = entries.iter().map(|(k, v)| entry_bytes(k, v)).sum();
        check_quota(
            self.quota_bytes,
            total,
            key,
            entries.get(key).map(String::as_str),
            value,
        )?;

        entries.insert(key.to_string(), value.to_string());
        if let Some(log) = &self.write_log {
            lock(log).push(StorageWrite {
                key: key.to_string(),
                value: value.to_string(),
            });
        }
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.ensure_available()?;
        lock(&self.entries).remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StorageError> {
        self.ensure_available()?;
        let mut keys: Vec<String> = lock(&self.entries).keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_storage_basic() {
        let storage = MemoryStorage::new();

        assert_eq!(storage.get("draft").unwrap(), None);

        storage.set("draft", "{}").unwrap();
        assert_eq!(storage.get("draft").unwrap().as_deref(), Some("{}"));
        assert_eq!(storage.keys().unwrap(), vec!["draft".to_string()]);

        storage.delete("draft").unwrap();
        assert!(!storage.contains_key("draft"));

        // Deleting again is fine
        storage.delete("draft").unwrap();
    }

    #[test]
    fn test_memory_storage_clones_share_entries() {
        let storage = MemoryStorage::new();
        let reloaded = storage.clone();

        storage.set("a", "1").unwrap();
        assert_eq!(reloaded.get("a").unwrap().as_deref(), Some("1"));
    }

    #[test]
    fn test_memory_storage_unavailable() {
        let storage = MemoryStorage::new();
        storage.set_unavailable(true);

        assert!(matches!(
            storage.set("a", "1"),
            Err(StorageError::Unavailable(_))
        ));
        assert!(matches!(storage.get("a"), Err(StorageError::Unavailable(_))));

        storage.set_unavailable(false);
        storage.set("a", "1").unwrap();
    }

    #[test]
    fn test_memory_storage_quota() {
        let storage = MemoryStorage::with_quota(10).recording();

        storage.set("key", "1234567").unwrap(); // 10 bytes
        assert!(matches!(
            storage.set("other", "x"),
            Err(StorageError::QuotaExceeded { .. })
        ));

        // Rejected write leaves the store unchanged
        assert_eq!(storage.get("key").unwrap().as_deref(), Some("1234567"));
        assert_eq!(storage.writes().len(), 1);
    }

    #[test]
    fn test_memory_storage_write_log() {
        let storage = MemoryStorage::new().recording();
        storage.insert_raw("seed", "x");
        storage.set("a", "1").unwrap();
        storage.set("b", "2").unwrap();
        storage.set("a", "3").unwrap();

        let writes = storage.writes_for("a");
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[1].value, "3");
        assert_eq!(storage.writes().len(), 3);
    }

    #[test]
    fn test_memory_storage_does_not_log_writes_by_default() {
        let storage = MemoryStorage::new();
        for i in 0..10_000 {
            storage.set("draft", &i.to_string()).unwrap();
        }

        assert_eq!(storage.len(), 1);
        assert!(storage.writes().is_empty());
        assert!(storage.write_log.is_none());
    }
}
