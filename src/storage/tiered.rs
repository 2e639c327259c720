use super::kv::KvBackend;
use super::memory::MemoryBackend;
use super::sqlite::SqliteBackend;
use super::{RecordBackend, StorageTier};
use crate::config::StorageConfig;
use crate::error::StorageError;
use crate::events::{BeaconEvent, EventBus};
use crate::record::AdvertisementRecord;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Ordered fallback chain of record backends
///
/// Exactly one tier is active at a time. A failed write advances to the next
/// tier and never comes back, so demotion is one-way for the process lifetime.
/// Records already written to an abandoned tier are not migrated.
pub struct TieredStorage {
    tiers: Vec<Arc<dyn RecordBackend>>,
    active: AtomicUsize,
    event_bus: Option<Arc<EventBus>>,
}

impl TieredStorage {
    /// Chain of already opened backends, most durable first
    pub fn new(tiers: Vec<Arc<dyn RecordBackend>>) -> Result<Self, StorageError> {
        if tiers.is_empty() {
            return Err(StorageError::NoTierAvailable);
        }

        Ok(Self {
            tiers,
            active: AtomicUsize::new(0),
            event_bus: None,
        })
    }

    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    /// Open every tier the configuration allows; tiers that fail to open are skipped
    pub fn open(config: &StorageConfig) -> Result<Self, StorageError> {
        let mut tiers: Vec<Arc<dyn RecordBackend>> = Vec::new();

        match SqliteBackend::open(&config.database_path) {
            Ok(backend) => tiers.push(Arc::new(backend)),
            Err(e) => warn!("SQLite tier unavailable, falling back: {}", e),
        }

        match KvBackend::open(&config.kv_dir) {
            Ok(backend) => tiers.push(Arc::new(backend)),
            Err(e) => warn!("Key-value tier unavailable, falling back: {}", e),
        }

        if config.allow_memory_fallback {
            tiers.push(Arc::new(MemoryBackend::new()));
        }

        let storage = Self::new(tiers)?;
        info!("Record storage active on {} tier", storage.active_tier());
        Ok(storage)
    }

    pub fn active_tier(&self) -> StorageTier {
        self.tiers[self.active_index()].tier()
    }

    pub fn tiers(&self) -> Vec<StorageTier> {
        self.tiers.iter().map(|tier| tier.tier()).collect()
    }

    fn active_index(&self) -> usize {
        self.active.load(Ordering::SeqCst).min(self.tiers.len() - 1)
    }

    /// Append on the active tier, demoting on failure until some tier accepts the batch
    pub async fn append(&self, records: Vec<AdvertisementRecord>) -> Result<StorageTier, StorageError> {
        let mut records = records;

        loop {
            let index = self.active_index();
            let backend = self.tiers[index].clone();

            let (returned, result) = tokio::task::spawn_blocking(move || {
                let result = backend.append(&records);
                (records, result)
            })
            .await
            .map_err(|e| StorageError::Task {
                details: e.to_string(),
            })?;
            records = returned;

            match result {
                Ok(()) => return Ok(self.tiers[index].tier()),
                Err(e) => {
                    if !self.demote_from(index, &e).await {
                        return Err(e);
                    }
                }
            }
        }
    }

    /// Advance past `index` if it is still active; false when no tier is left
    async fn demote_from(&self, index: usize, cause: &StorageError) -> bool {
        let next = index + 1;
        if next >= self.tiers.len() {
            warn!(
                "Write failed on {} tier and no fallback remains: {}",
                self.tiers[index].tier(),
                cause
            );
            return false;
        }

        // Another writer may already have demoted past this tier
        if self
            .active
            .compare_exchange(index, next, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return true;
        }

        let from = self.tiers[index].tier();
        let to = self.tiers[next].tier();
        if let Some(bus) = &self.event_bus {
            let _ = bus
                .publish(BeaconEvent::StorageDemoted {
                    from: from.to_string(),
                    to: to.to_string(),
                    reason: cause.to_string(),
                })
                .await;
        } else {
            warn!("Storage demoted {} -> {}: {}", from, to, cause);
        }

        true
    }

    /// All records from the active tier, falling through to later tiers if it cannot be read
    pub async fn load_all(&self) -> Result<Vec<AdvertisementRecord>, StorageError> {
        self.read_with_fallback(|backend| backend.load_all()).await
    }

    pub async fn count_since(&self, cutoff: DateTime<Utc>) -> Result<usize, StorageError> {
        self.read_with_fallback(move |backend| backend.count_since(cutoff))
            .await
    }

    async fn read_with_fallback<T, F>(&self, read: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: Fn(&dyn RecordBackend) -> Result<T, StorageError> + Send + Sync + Clone + 'static,
    {
        let mut last_error = StorageError::NoTierAvailable;

        for backend in &self.tiers[self.active_index()..] {
            let backend = backend.clone();
            let read = read.clone();
            let tier = backend.tier();

            let result = tokio::task::spawn_blocking(move || read(backend.as_ref()))
                .await
                .map_err(|e| StorageError::Task {
                    details: e.to_string(),
                })?;

            match result {
                Ok(value) => return Ok(value),
                Err(e) => {
                    debug!("Read from {} tier failed: {}", tier, e);
                    last_error = e;
                }
            }
        }

        Err(last_error)
    }

    /// Bulk clear on every tier
    pub async fn clear(&self) -> Result<(), StorageError> {
        let active = self.active_index();
        let tiers = self.tiers.clone();

        tokio::task::spawn_blocking(move || {
            for (index, backend) in tiers.iter().enumerate() {
                match backend.clear() {
                    Ok(()) => {}
                    Err(e) if index == active => return Err(e),
                    Err(e) => warn!("Could not clear inactive {} tier: {}", backend.tier(), e),
                }
            }
            Ok(())
        })
        .await
        .map_err(|e| StorageError::Task {
            details: e.to_string(),
        })?
    }
}
