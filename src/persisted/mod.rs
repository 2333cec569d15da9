//! Keyed, expiring, validated persistence of single values.
//!
//! A [`Persistence`] bundles the three injected ports (storage, clock,
//! scheduler) and hands out [`PersistentValue`]s that share them.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::runtime::Handle;

use crate::clock::{Clock, ManualClock, SystemClock};
use crate::config::{Config, StorageBackend};
use crate::scheduler::{ManualScheduler, Scheduler, TokioScheduler};
use crate::storage::{FileStorage, KeyValueStorage, MemoryStorage, StorageError};

mod record;
mod value;

pub use record::{StoredRecord, RECORD_VERSION};
pub use value::PersistentValue;

/// Default time a stored value stays restorable
pub const DEFAULT_EXPIRATION_HOURS: u64 = 24;

/// Default quiet period before a debounced write
pub const DEFAULT_SAVE_DELAY: Duration = Duration::from_millis(1000);

/// Bounds every persisted payload must satisfy
pub trait PersistedData: Serialize + DeserializeOwned + Clone + Send + 'static {}

impl<T> PersistedData for T where T: Serialize + DeserializeOwned + Clone + Send + 'static {}

/// Load-time predicate; a `false` discards the stored value
pub type Validator<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;

/// Fire-and-forget notification carrying the affected value
pub type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Behaviour knobs for a [`PersistentValue`]
pub struct PersistOptions<T> {
    /// How long a stored value stays restorable
    pub expiration: Duration,
    /// Quiet period before a debounced write fires
    pub save_delay: Duration,
    /// Whether mutations schedule writes automatically
    pub auto_save: bool,
    pub validator: Option<Validator<T>>,
    pub on_restore: Option<Callback<T>>,
    pub on_save: Option<Callback<T>>,
}

impl<T> Default for PersistOptions<T> {
    fn default() -> Self {
        Self {
            expiration: Duration::from_secs(DEFAULT_EXPIRATION_HOURS * 3600),
            save_delay: DEFAULT_SAVE_DELAY,
            auto_save: true,
            validator: None,
            on_restore: None,
            on_save: None,
        }
    }
}

impl<T> Clone for PersistOptions<T> {
    fn clone(&self) -> Self {
        Self {
            expiration: self.expiration,
            save_delay: self.save_delay,
            auto_save: self.auto_save,
            validator: self.validator.clone(),
            on_restore: self.on_restore.clone(),
            on_save: self.on_save.clone(),
        }
    }
}

impl<T> PersistOptions<T> {
    pub fn expiration(mut self, expiration: Duration) -> Self {
        self.expiration = expiration;
        self
    }

    pub fn expiration_hours(self, hours: u64) -> Self {
        self.expiration(Duration::from_secs(hours.saturating_mul(3600)))
    }

    pub fn save_delay(mut self, delay: Duration) -> Self {
        self.save_delay = delay;
        self
    }

    pub fn auto_save(mut self, auto_save: bool) -> Self {
        self.auto_save = auto_save;
        self
    }

    pub fn validate(mut self, validator: impl Fn(&T) -> bool + Send + Sync + 'static) -> Self {
        self.validator = Some(Arc::new(validator));
        self
    }

    pub fn on_restore(mut self, callback: impl Fn(&T) + Send + Sync + 'static) -> Self {
        self.on_restore = Some(Arc::new(callback));
        self
    }

    pub fn on_save(mut self, callback: impl Fn(&T) + Send + Sync + 'static) -> Self {
        self.on_save = Some(Arc::new(callback));
        self
    }
}

/// Shared ports for every persisted value in a program
#[derive(Clone)]
pub struct Persistence {
    storage: Arc<dyn KeyValueStorage>,
    clock: Arc<dyn Clock>,
    scheduler: Arc<dyn Scheduler>,
}

impl Persistence {
    pub fn new(
        storage: Arc<dyn KeyValueStorage>,
        clock: Arc<dyn Clock>,
        scheduler: Arc<dyn Scheduler>,
    ) -> Self {
        Self {
            storage,
            clock,
            scheduler,
        }
    }

    /// Wire the configured storage backend with the wall clock and tokio timers
    pub fn from_config(config: &Config, runtime: Handle) -> Result<Self, StorageError> {
        let storage: Arc<dyn KeyValueStorage> = match config.storage.backend {
            StorageBackend::File => Arc::new(
                FileStorage::open(config.storage_path())?.with_quota(config.storage.quota()),
            ),
            StorageBackend::Memory => match config.storage.quota() {
                Some(quota) => Arc::new(MemoryStorage::with_quota(quota)),
                None => Arc::new(MemoryStorage::new()),
            },
        };

        tracing::debug!(
            backend = ?config.storage.backend,
            path = %config.storage_path().display(),
            "Draft storage ready"
        );

        Ok(Self::new(
            storage,
            Arc::new(SystemClock),
            Arc::new(TokioScheduler::new(runtime)),
        ))
    }

    pub fn storage(&self) -> &Arc<dyn KeyValueStorage> {
        &self.storage
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn scheduler(&self) -> &Arc<dyn Scheduler> {
        &self.scheduler
    }

    /// Create a value under `key`, restoring any stored, unexpired, valid copy
    pub fn value<T: PersistedData>(
        &self,
        key: impl Into<String>,
        default: T,
        options: PersistOptions<T>,
    ) -> PersistentValue<T> {
        PersistentValue::new(self, key.into(), default, options)
    }
}

/// In-memory storage plus virtual time, for tests and offline demos.
///
/// Every [`Persistence`] built from the same ports shares one store and one
/// clock, so dropping a workflow and building another simulates a reload.
#[derive(Clone)]
pub struct ManualPorts {
    pub storage: MemoryStorage,
    pub scheduler: ManualScheduler,
}

impl ManualPorts {
    pub fn new(start_ms: i64) -> Self {
        Self::with_storage(start_ms, MemoryStorage::new())
    }

    pub fn with_quota(start_ms: i64, quota_bytes: usize) -> Self {
        Self::with_storage(start_ms, MemoryStorage::with_quota(quota_bytes))
    }

    fn with_storage(start_ms: i64, storage: MemoryStorage) -> Self {
        Self {
            storage: storage.recording(),
            scheduler: ManualScheduler::new(ManualClock::new(start_ms)),
        }
    }

    pub fn clock(&self) -> &ManualClock {
        self.scheduler.clock()
    }

    /// Move virtual time forward, firing due timers
    pub fn advance(&self, by: Duration) -> usize {
        self.scheduler.advance(by)
    }

    pub fn persistence(&self) -> Persistence {
        Persistence::new(
            Arc::new(self.storage.clone()),
            Arc::new(self.clock().clone()),
            Arc::new(self.scheduler.clone()),
        )
    }
}
