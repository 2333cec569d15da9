use std::fmt;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

use super::{Callback, PersistOptions, PersistedData, Persistence, StoredRecord};
use crate::clock::{duration_ms, to_datetime, Clock};
use crate::scheduler::{Scheduler, TimerHandle};
use crate::storage::KeyValueStorage;
use crate::sync::lock;

/// A single value kept in memory and mirrored to storage under one key.
///
/// Reads always see the latest in-memory value. Storage lags behind by at
/// most the configured save delay unless [`save`](Self::save) or
/// [`flush`](Self::flush) is called. Storage failures are logged and never
/// surface to the caller; the in-memory value stays authoritative.
///
/// Updaters and callbacks must not call back into the same value.
pub struct PersistentValue<T: PersistedData> {
    inner: Arc<Mutex<Inner<T>>>,
    scheduler: Arc<dyn Scheduler>,
}

struct PendingWrite {
    generation: u64,
    handle: TimerHandle,
}

struct Inner<T> {
    key: String,
    value: T,
    default: T,
    restored: bool,
    last_saved_ms: Option<i64>,
    /// At most one outstanding debounced write
    pending: Option<PendingWrite>,
    generation: u64,
    options: PersistOptions<T>,
    storage: Arc<dyn KeyValueStorage>,
    clock: Arc<dyn Clock>,
}

type Notification<T> = Option<(Callback<T>, T)>;

impl<T: PersistedData> Inner<T> {
    fn cancel_pending(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.handle.cancel();
        }
    }

    fn discard_stored(&self) {
        if let Err(e) = self.storage.delete(&self.key) {
            tracing::warn!(key = %self.key, error = %e, "Failed to delete stored value");
        }
    }

    /// Read the stored record, discarding it if corrupt, expired, or invalid
    fn load(&mut self) -> Option<StoredRecord<T>> {
        let raw = match self.storage.get(&self.key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(key = %self.key, error = %e, "Failed to read stored value");
                return None;
            }
        };

        let record: StoredRecord<T> = match serde_json::from_str(&raw) {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(key = %self.key, error = %e, "Discarding corrupt stored value");
                self.discard_stored();
                return None;
            }
        };

        let now = self.clock.now_ms();
        if record.is_expired(now, duration_ms(self.options.expiration)) {
            tracing::debug!(
                key = %self.key,
                saved_at = record.timestamp,
                "Discarding expired stored value"
            );
            self.discard_stored();
            return None;
        }

        if let Some(validator) = &self.options.validator {
            if !validator(&record.data) {
                tracing::warn!(key = %self.key, "Stored value failed validation, discarding");
                self.discard_stored();
                return None;
            }
        }

        self.restored = true;
        Some(record)
    }

    /// Write the current value with a fresh timestamp. Returns whether it stuck.
    fn write(&mut self) -> bool {
        let now = self.clock.now_ms();
        let payload = match serde_json::to_string(&StoredRecord::new(&self.value, now)) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(key = %self.key, error = %e, "Failed to serialize value");
                return false;
            }
        };

        match self.storage.set(&self.key, &payload) {
            Ok(()) => {
                self.last_saved_ms = Some(now);
                tracing::debug!(key = %self.key, bytes = payload.len(), "Saved value");
                true
            }
            Err(e) => {
                tracing::warn!(
                    key = %self.key,
                    error = %e,
                    "Failed to persist value, keeping in-memory copy"
                );
                false
            }
        }
    }

    fn write_and_notify(&mut self) -> Notification<T> {
        if !self.write() {
            return None;
        }
        self.options
            .on_save
            .clone()
            .map(|callback| (callback, self.value.clone()))
    }
}

fn notify<T>(notification: Notification<T>) {
    if let Some((callback, value)) = notification {
        callback(&value);
    }
}

/// Timer body: write only if this timer is still the outstanding one
fn write_if_current<T: PersistedData>(inner: &Mutex<Inner<T>>, generation: u64) {
    let notification = {
        let mut inner = lock(inner);
        match &inner.pending {
            Some(pending) if pending.generation == generation => {}
            _ => return,
        }
        inner.pending = None;
        inner.write_and_notify()
    };
    notify(notification);
}

impl<T: PersistedData> PersistentValue<T> {
    pub(super) fn new(
        persistence: &Persistence,
        key: String,
        default: T,
        options: PersistOptions<T>,
    ) -> Self {
        let mut inner = Inner {
            key,
            value: default.clone(),
            default,
            restored: false,
            last_saved_ms: None,
            pending: None,
            generation: 0,
            options,
            storage: Arc::clone(persistence.storage()),
            clock: Arc::clone(persistence.clock()),
        };

        let mut notification = None;
        if let Some(record) = inner.load() {
            tracing::debug!(key = %inner.key, saved_at = record.timestamp, "Restored value");
            inner.value = record.data;
            inner.last_saved_ms = Some(record.timestamp);
            notification = inner
                .options
                .on_restore
                .clone()
                .map(|callback| (callback, inner.value.clone()));
        }
        notify(notification);

        Self {
            inner: Arc::new(Mutex::new(inner)),
            scheduler: Arc::clone(persistence.scheduler()),
        }
    }

    /// Read the stored value if present, unexpired, and valid.
    ///
    /// Corrupt, expired, or invalid records are deleted. A successful load
    /// marks the value as restored but does not replace the in-memory value.
    pub fn load(&self) -> Option<T> {
        lock(&self.inner).load().map(|record| record.data)
    }

    /// Current in-memory value
    pub fn value(&self) -> T {
        lock(&self.inner).value.clone()
    }

    /// Borrow the current in-memory value
    pub fn with_value<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&lock(&self.inner).value)
    }

    pub fn key(&self) -> String {
        lock(&self.inner).key.clone()
    }

    /// Whether construction (or a later `load`) found a usable stored value
    pub fn is_restored(&self) -> bool {
        lock(&self.inner).restored
    }

    /// Time of the last successful write, or of the restored record
    pub fn last_saved(&self) -> Option<DateTime<Utc>> {
        lock(&self.inner).last_saved_ms.and_then(to_datetime)
    }

    pub fn has_pending_write(&self) -> bool {
        lock(&self.inner).pending.is_some()
    }

    /// Replace the value
    pub fn set_value(&self, value: T) {
        self.update_with(move |_| value);
    }

    /// Replace the value with `f(current)`
    pub fn update_with(&self, f: impl FnOnce(&T) -> T) {
        let mut inner = lock(&self.inner);
        let next = f(&inner.value);
        inner.value = next;
        if inner.options.auto_save {
            self.schedule_write(&mut inner);
        }
    }

    /// Write now, superseding any pending debounced write
    pub fn save(&self) {
        let notification = {
            let mut inner = lock(&self.inner);
            inner.cancel_pending();
            inner.write_and_notify()
        };
        notify(notification);
    }

    /// Perform the pending debounced write immediately, if there is one
    pub fn flush(&self) -> bool {
        let notification = {
            let mut inner = lock(&self.inner);
            if inner.pending.is_none() {
                return false;
            }
            inner.cancel_pending();
            inner.write_and_notify()
        };
        notify(notification);
        true
    }

    /// Delete the stored record and return to the default value
    pub fn clear(&self) {
        let mut inner = lock(&self.inner);
        inner.cancel_pending();
        inner.discard_stored();
        inner.value = inner.default.clone();
        inner.restored = false;
        inner.last_saved_ms = None;
        tracing::debug!(key = %inner.key, "Cleared value");
    }

    /// Return to the default value without deleting the stored record.
    ///
    /// With auto-save on, the default is written immediately.
    pub fn reset(&self) {
        let notification = {
            let mut inner = lock(&self.inner);
            inner.cancel_pending();
            inner.value = inner.default.clone();
            if inner.options.auto_save {
                inner.write_and_notify()
            } else {
                None
            }
        };
        notify(notification);
    }

    fn schedule_write(&self, inner: &mut Inner<T>) {
        inner.cancel_pending();
        inner.generation = inner.generation.wrapping_add(1);
        let generation = inner.generation;

        let target = Arc::downgrade(&self.inner);
        let handle = self.scheduler.schedule(
            inner.options.save_delay,
            Box::new(move || {
                if let Some(inner) = target.upgrade() {
                    write_if_current(&inner, generation);
                }
            }),
        );
        inner.pending = Some(PendingWrite { generation, handle });
    }
}

impl<T: PersistedData> Drop for PersistentValue<T> {
    fn drop(&mut self) {
        lock(&self.inner).cancel_pending();
    }
}

impl<T: PersistedData + fmt::Debug> fmt::Debug for PersistentValue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = lock(&self.inner);
        f.debug_struct("PersistentValue")
            .field("key", &inner.key)
            .field("value", &inner.value)
            .field("restored", &inner.restored)
            .field("pending_write", &inner.pending.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persisted::ManualPorts;
    use serde::{Deserialize, Serialize};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const START_MS: i64 = 1_700_000_000_000;
    const HOUR_MS: i64 = 3_600_000;

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Draft {
        title: String,
        price: u64,
        tags: Vec<String>,
    }

    fn draft(title: &str, price: u64) -> Draft {
        Draft {
            title: title.to_string(),
            price,
            tags: vec!["retail".to_string()],
        }
    }

    fn seed(ports: &ManualPorts, key: &str, data: &Draft, timestamp: i64) {
        let raw = serde_json::to_string(&StoredRecord::new(data, timestamp)).unwrap();
        ports.storage.insert_raw(key, &raw);
    }

    #[test]
    fn test_starts_with_default_when_nothing_stored() {
        let ports = ManualPorts::new(START_MS);
        let value = ports
            .persistence()
            .value("draft", Draft::default(), PersistOptions::default());

        assert_eq!(value.value(), Draft::default());
        assert!(!value.is_restored());
        assert!(value.last_saved().is_none());
        assert!(value.load().is_none());
    }

    #[test]
    fn test_save_then_fresh_instance_restores() {
        let ports = ManualPorts::new(START_MS);
        let persistence = ports.persistence();

        let value = persistence.value("draft", Draft::default(), PersistOptions::default());
        value.set_value(draft("Corner bakery", 250_000));
        value.save();
        drop(value);

        ports.clock().advance(Duration::from_secs(3600));

        let restored_count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&restored_count);
        let reloaded = persistence.value(
            "draft",
            Draft::default(),
            PersistOptions::default().on_restore(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        assert_eq!(reloaded.value(), draft("Corner bakery", 250_000));
        assert!(reloaded.is_restored());
        assert_eq!(restored_count.load(Ordering::SeqCst), 1);
        assert_eq!(
            reloaded.last_saved().unwrap().timestamp_millis(),
            START_MS
        );
    }

    #[test]
    fn test_expired_record_is_absent_and_deleted() {
        let ports = ManualPorts::new(START_MS);
        seed(&ports, "draft", &draft("Stale", 1), START_MS - (24 * HOUR_MS + 1));

        let value = ports
            .persistence()
            .value("draft", Draft::default(), PersistOptions::default());

        assert!(!value.is_restored());
        assert_eq!(value.value(), Draft::default());
        assert!(!ports.storage.contains_key("draft"));
    }

    #[test]
    fn test_record_just_inside_window_is_restored() {
        let ports = ManualPorts::new(START_MS);
        seed(&ports, "draft", &draft("Fresh", 1), START_MS - (HOUR_MS - 1));

        let value = ports.persistence().value(
            "draft",
            Draft::default(),
            PersistOptions::default().expiration_hours(1),
        );

        assert!(value.is_restored());
        assert_eq!(value.value().title, "Fresh");
    }

    #[test]
    fn test_expires_while_alive() {
        let ports = ManualPorts::new(START_MS);
        let persistence = ports.persistence();
        let value = persistence.value(
            "draft",
            Draft::default(),
            PersistOptions::default().expiration_hours(1),
        );
        value.set_value(draft("Short lived", 5));
        value.save();

        ports.clock().advance(Duration::from_secs(3600));

        assert!(value.load().is_none());
        assert!(!ports.storage.contains_key("draft"));
        // In-memory value is untouched by an expired load
        assert_eq!(value.value().title, "Short lived");
    }

    #[test]
    fn test_debounce_coalesces_rapid_updates() {
        let ports = ManualPorts::new(START_MS);
        let value = ports.persistence().value(
            "draft",
            Draft::default(),
            PersistOptions::default().save_delay(Duration::from_millis(1000)),
        );

        for price in 1..=5 {
            value.update_with(|d| Draft {
                price,
                ..d.clone()
            });
            // Visible synchronously
            assert_eq!(value.value().price, price);
            ports.advance(Duration::from_millis(400));
        }

        assert!(ports.storage.writes_for("draft").is_empty());
        assert!(value.has_pending_write());

        // Last update happened at +1600; its write is due at +2600
        ports.advance(Duration::from_millis(599));
        assert!(ports.storage.writes_for("draft").is_empty());
        ports.advance(Duration::from_millis(1));

        let writes = ports.storage.writes_for("draft");
        assert_eq!(writes.len(), 1);

        let record: StoredRecord<Draft> = serde_json::from_str(&writes[0].value).unwrap();
        assert_eq!(record.data.price, 5);
        assert_eq!(record.timestamp, START_MS + 1600 + 1000);
        assert!(!value.has_pending_write());
        assert_eq!(ports.scheduler.pending(), 0);
    }

    #[test]
    fn test_validator_rejection_discards_record() {
        let ports = ManualPorts::new(START_MS);
        seed(&ports, "draft", &draft("Anything", 10), START_MS);

        let value = ports.persistence().value(
            "draft",
            Draft::default(),
            PersistOptions::default().validate(|_| false),
        );

        assert!(!value.is_restored());
        assert_eq!(value.value(), Draft::default());
        assert!(!ports.storage.contains_key("draft"));
    }

    #[test]
    fn test_validator_acceptance() {
        let ports = ManualPorts::new(START_MS);
        seed(&ports, "draft", &draft("Priced", 10), START_MS);

        let value = ports.persistence().value(
            "draft",
            Draft::default(),
            PersistOptions::default().validate(|d: &Draft| d.price > 0),
        );
        assert!(value.is_restored());
    }

    #[test]
    fn test_corrupt_record_discarded() {
        let ports = ManualPorts::new(START_MS);
        ports.storage.insert_raw("draft", "{not json");
        ports.storage.insert_raw("other", r#"{"data": 1, "timestamp": 0}"#);

        let value = ports
            .persistence()
            .value("draft", Draft::default(), PersistOptions::default());

        assert!(!value.is_restored());
        assert!(!ports.storage.contains_key("draft"));
        // Unrelated keys are left alone
        assert!(ports.storage.contains_key("other"));
    }

    #[test]
    fn test_wrong_shape_is_corrupt() {
        let ports = ManualPorts::new(START_MS);
        ports
            .storage
            .insert_raw("draft", r#"{"data": "a string", "timestamp": 1}"#);

        let value = ports
            .persistence()
            .value("draft", Draft::default(), PersistOptions::default());

        assert!(!value.is_restored());
        assert!(!ports.storage.contains_key("draft"));
    }

    #[test]
    fn test_save_cancels_pending_write() {
        let ports = ManualPorts::new(START_MS);
        let value = ports
            .persistence()
            .value("draft", Draft::default(), PersistOptions::default());

        value.set_value(draft("Typed", 1));
        assert!(value.has_pending_write());

        value.save();
        assert!(!value.has_pending_write());
        assert_eq!(ports.storage.writes_for("draft").len(), 1);

        ports.advance(Duration::from_secs(5));
        assert_eq!(ports.storage.writes_for("draft").len(), 1);
    }

    #[test]
    fn test_clear_deletes_and_cancels() {
        let ports = ManualPorts::new(START_MS);
        let value = ports
            .persistence()
            .value("draft", draft("Default", 0), PersistOptions::default());

        value.set_value(draft("Saved", 1));
        value.save();
        value.set_value(draft("Unsaved", 2));

        value.clear();

        assert_eq!(value.value(), draft("Default", 0));
        assert!(!value.is_restored());
        assert!(value.last_saved().is_none());
        assert!(!ports.storage.contains_key("draft"));

        ports.advance(Duration::from_secs(5));
        assert!(!ports.storage.contains_key("draft"));
        assert!(value.load().is_none());
    }

    #[test]
    fn test_reset_writes_default_immediately() {
        let ports = ManualPorts::new(START_MS);
        let value = ports
            .persistence()
            .value("draft", draft("Default", 0), PersistOptions::default());

        value.set_value(draft("Edited", 9));
        value.reset();

        assert_eq!(value.value(), draft("Default", 0));
        assert!(!value.has_pending_write());
        let writes = ports.storage.writes_for("draft");
        assert_eq!(writes.len(), 1);
        let record: StoredRecord<Draft> = serde_json::from_str(&writes[0].value).unwrap();
        assert_eq!(record.data, draft("Default", 0));
    }

    #[test]
    fn test_reset_without_auto_save_keeps_record() {
        let ports = ManualPorts::new(START_MS);
        let value = ports.persistence().value(
            "draft",
            draft("Default", 0),
            PersistOptions::default().auto_save(false),
        );

        value.set_value(draft("Edited", 9));
        assert!(!value.has_pending_write());
        value.save();

        value.reset();
        assert_eq!(value.value(), draft("Default", 0));
        assert_eq!(value.load().unwrap(), draft("Edited", 9));
    }

    #[test]
    fn test_write_failure_keeps_memory_authoritative() {
        let ports = ManualPorts::new(START_MS);
        let saves = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&saves);
        let value = ports.persistence().value(
            "draft",
            Draft::default(),
            PersistOptions::default().on_save(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        ports.storage.set_unavailable(true);
        value.set_value(draft("Offline", 3));
        ports.advance(Duration::from_secs(2));
        value.save();

        assert_eq!(value.value(), draft("Offline", 3));
        assert!(value.last_saved().is_none());
        assert_eq!(saves.load(Ordering::SeqCst), 0);

        ports.storage.set_unavailable(false);
        value.save();
        assert_eq!(saves.load(Ordering::SeqCst), 1);
        assert!(value.last_saved().is_some());
    }

    #[test]
    fn test_quota_exceeded_is_swallowed() {
        let ports = ManualPorts::with_quota(START_MS, 32);
        let value = ports
            .persistence()
            .value("draft", Draft::default(), PersistOptions::default());

        value.set_value(draft(&"x".repeat(100), 1));
        value.save();

        assert!(!ports.storage.contains_key("draft"));
        assert_eq!(value.value().title.len(), 100);
    }

    #[test]
    fn test_on_save_fires_for_debounced_write() {
        let ports = ManualPorts::new(START_MS);
        let saved = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&saved);
        let value = ports.persistence().value(
            "draft",
            Draft::default(),
            PersistOptions::default()
                .on_save(move |d: &Draft| sink.lock().unwrap().push(d.price)),
        );

        value.set_value(draft("a", 1));
        value.set_value(draft("a", 2));
        ports.advance(Duration::from_millis(1000));

        assert_eq!(*saved.lock().unwrap(), vec![2]);
    }

    #[test]
    fn test_auto_save_disabled_never_schedules() {
        let ports = ManualPorts::new(START_MS);
        let value = ports.persistence().value(
            "draft",
            Draft::default(),
            PersistOptions::default().auto_save(false),
        );

        value.set_value(draft("Manual", 1));
        ports.advance(Duration::from_secs(10));

        assert_eq!(ports.scheduler.pending(), 0);
        assert!(ports.storage.writes().is_empty());
    }

    #[test]
    fn test_drop_cancels_pending_write() {
        let ports = ManualPorts::new(START_MS);
        let value = ports
            .persistence()
            .value("draft", Draft::default(), PersistOptions::default());
        value.set_value(draft("Unmounted", 1));
        drop(value);

        assert_eq!(ports.scheduler.pending(), 0);
        ports.advance(Duration::from_secs(5));
        assert!(ports.storage.writes().is_empty());
    }

    #[test]
    fn test_flush_writes_pending_only() {
        let ports = ManualPorts::new(START_MS);
        let value = ports
            .persistence()
            .value("draft", Draft::default(), PersistOptions::default());

        assert!(!value.flush());
        assert!(ports.storage.writes().is_empty());

        value.set_value(draft("Leaving", 1));
        assert!(value.flush());
        assert_eq!(ports.storage.writes_for("draft").len(), 1);
        assert!(!value.has_pending_write());
    }

    #[test]
    fn test_unreadable_storage_falls_back_to_default() {
        let ports = ManualPorts::new(START_MS);
        seed(&ports, "draft", &draft("Hidden", 1), START_MS);
        ports.storage.set_unavailable(true);

        let value = ports
            .persistence()
            .value("draft", Draft::default(), PersistOptions::default());
        assert!(!value.is_restored());

        // Record is not deleted just because the read failed
        ports.storage.set_unavailable(false);
        assert!(ports.storage.contains_key("draft"));
        assert_eq!(value.load().unwrap().title, "Hidden");
        assert!(value.is_restored());
    }
}
