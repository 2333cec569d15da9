//! On-storage envelope for a persisted value.

use serde::{Deserialize, Serialize};

/// Version tag written with every record. Not interpreted on load yet.
pub const RECORD_VERSION: &str = "1.0";

fn default_version() -> String {
    RECORD_VERSION.to_string()
}

/// `{"data": <T>, "timestamp": <epoch ms>, "version": "1.0"}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord<T> {
    pub data: T,
    pub timestamp: i64,
    #[serde(default = "default_version")]
    pub version: String,
}

impl<T> StoredRecord<T> {
    pub fn new(data: T, timestamp: i64) -> Self {
        Self {
            data,
            timestamp,
            version: RECORD_VERSION.to_string(),
        }
    }

    /// Whether the record is stale at `now_ms` for the given window.
    ///
    /// A record is expired once `timestamp + window <= now`.
    pub fn is_expired(&self, now_ms: i64, window_ms: i64) -> bool {
        self.timestamp.saturating_add(window_ms) <= now_ms
    }

    /// Milliseconds until expiry at `now_ms`, zero if already expired
    pub fn remaining_ms(&self, now_ms: i64, window_ms: i64) -> i64 {
        (self.timestamp.saturating_add(window_ms) - now_ms).max(0)
    }
}
