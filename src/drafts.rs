//! Inspection and housekeeping of stored drafts.
//!
//! These work on raw records without knowing the payload type, so the CLI
//! can list and purge drafts written by any form.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::clock::{duration_ms, to_datetime, Clock};
use crate::persisted::StoredRecord;
use crate::storage::{KeyValueStorage, StorageError};
use crate::workflow::{data_key, state_key};

/// Condition of one stored record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DraftStatus {
    Fresh { expires_in: Duration },
    Expired,
    /// Not a readable record envelope
    Corrupt,
}

impl DraftStatus {
    pub fn label(&self) -> &'static str {
        match self {
            DraftStatus::Fresh { .. } => "fresh",
            DraftStatus::Expired => "expired",
            DraftStatus::Corrupt => "corrupt",
        }
    }
}

/// One stored record as seen by [`inspect`]
#[derive(Debug, Clone, PartialEq)]
pub struct DraftSummary {
    pub key: String,
    pub saved_at: Option<DateTime<Utc>>,
    pub version: Option<String>,
    pub bytes: usize,
    pub status: DraftStatus,
}

/// Outcome of a [`sweep`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub removed_expired: Vec<String>,
    pub removed_corrupt: Vec<String>,
    pub kept: usize,
}

impl SweepReport {
    pub fn removed(&self) -> usize {
        self.removed_expired.len() + self.removed_corrupt.len()
    }
}

fn summarize(key: String, raw: &str, now_ms: i64, window_ms: i64) -> DraftSummary {
    let bytes = raw.len();
    match serde_json::from_str::<StoredRecord<Value>>(raw) {
        Ok(record) => {
            let status = if record.is_expired(now_ms, window_ms) {
                DraftStatus::Expired
            } else {
                let remaining = record.remaining_ms(now_ms, window_ms);
                DraftStatus::Fresh {
                    expires_in: Duration::from_millis(u64::try_from(remaining).unwrap_or(0)),
                }
            };
            DraftSummary {
                key,
                saved_at: to_datetime(record.timestamp),
                version: Some(record.version),
                bytes,
                status,
            }
        }
        Err(_) => DraftSummary {
            key,
            saved_at: None,
            version: None,
            bytes,
            status: DraftStatus::Corrupt,
        },
    }
}

/// List stored records whose key starts with `prefix`, sorted by key
pub fn inspect(
    storage: &dyn KeyValueStorage,
    clock: &dyn Clock,
    expiration: Duration,
    prefix: Option<&str>,
) -> Result<Vec<DraftSummary>, StorageError> {
    let now_ms = clock.now_ms();
    let window_ms = duration_ms(expiration);

    let mut keys: Vec<String> = storage
        .keys()?
        .into_iter()
        .filter(|key| prefix.map_or(true, |p| key.starts_with(p)))
        .collect();
    keys.sort();

    let mut summaries = Vec::with_capacity(keys.len());
    for key in keys {
        // Deleted between keys() and get(); nothing to report
        let Some(raw) = storage.get(&key)? else {
            continue;
        };
        summaries.push(summarize(key, &raw, now_ms, window_ms));
    }
    Ok(summaries)
}

/// Delete every expired or corrupt record whose key starts with `prefix`
pub fn sweep(
    storage: &dyn KeyValueStorage,
    clock: &dyn Clock,
    expiration: Duration,
    prefix: Option<&str>,
) -> Result<SweepReport, StorageError> {
    let mut report = SweepReport::default();

    for summary in inspect(storage, clock, expiration, prefix)? {
        match summary.status {
            DraftStatus::Fresh { .. } => report.kept += 1,
            DraftStatus::Expired => {
                storage.delete(&summary.key)?;
                report.removed_expired.push(summary.key);
            }
            DraftStatus::Corrupt => {
                storage.delete(&summary.key)?;
                report.removed_corrupt.push(summary.key);
            }
        }
    }

    tracing::info!(
        expired = report.removed_expired.len(),
        corrupt = report.removed_corrupt.len(),
        kept = report.kept,
        "Swept stored drafts"
    );
    Ok(report)
}

/// Delete both records of the workflow `form_key`
pub fn discard_workflow(storage: &dyn KeyValueStorage, form_key: &str) -> Result<(), StorageError> {
    storage.delete(&data_key(form_key))?;
    storage.delete(&state_key(form_key))?;
    tracing::info!(form_key, "Discarded workflow draft");
    Ok(())
}
