//! Key-value storage abstraction layer.
//!
//! Drafts are persisted as strings under string keys, the same contract a
//! browser's local storage offers. The trait keeps the persistence core free
//! of any particular medium:
//! - [`MemoryStorage`] for tests and throwaway sessions
//! - [`FileStorage`] for drafts that survive restarts

use thiserror::Error;

mod file;
mod memory;

pub use file::FileStorage;
pub use memory::{MemoryStorage, StorageWrite};

/// Default quota in bytes, matching the common 5 MiB browser allowance
pub const DEFAULT_QUOTA_BYTES: usize = 5 * 1024 * 1024;

/// Errors raised by storage adapters
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("storage is unavailable: {0}")]
    Unavailable(String),

    #[error("quota exceeded writing '{key}': {bytes} bytes needed, quota is {quota}")]
    QuotaExceeded {
        key: String,
        bytes: usize,
        quota: usize,
    },

    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage index is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Trait abstracting a synchronous string key-value store
pub trait KeyValueStorage: Send + Sync {
    /// Read the value stored under `key`, `None` if absent
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Store `value` under `key`, replacing any previous value
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Remove `key`. Removing a missing key is not an error.
    fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// List every stored key
    fn keys(&self) -> Result<Vec<String>, StorageError>;
}

/// Bytes charged against a quota for one entry
fn entry_bytes(key: &str, value: &str) -> usize {
    key.len() + value.len()
}

/// Check that replacing `key` with `value` keeps the store within `quota`.
///
/// `current_total` is the charge of all entries before the write and
/// `previous` the value currently stored under `key`, if any.
fn check_quota(
    quota: Option<usize>,
    current_total: usize,
    key: &str,
    previous: Option<&str>,
    value: &str,
) -> Result<(), StorageError> {
    let Some(quota) = quota else {
        return Ok(());
    };

    let released = previous.map_or(0, |p| entry_bytes(key, p));
    let needed = current_total.saturating_sub(released) + entry_bytes(key, value);
    if needed > quota {
        return Err(StorageError::QuotaExceeded {
            key: key.to_string(),
            bytes: needed,
            quota,
        });
    }
    Ok(())
}
