//! Tiered, crash-tolerant record persistence.
//!
//! Three backends of decreasing durability sit behind [`RecordBackend`]:
//! SQLite, a key-value blob store and an in-process list. [`TieredStorage`]
//! picks the first one that opens and demotes one-way on write failures;
//! [`WriteBatcher`] debounces writes into single transactions; [`RecordStore`]
//! is the facade the pipeline and the export tool talk to.

pub mod batch;
pub mod kv;
pub mod memory;
pub mod sqlite;
pub mod tiered;

#[cfg(test)]
mod tests;

pub use batch::WriteBatcher;
pub use kv::{FileKvStore, KeyValueStore, KvBackend, RECORDS_KEY};
pub use memory::MemoryBackend;
pub use sqlite::SqliteBackend;
pub use tiered::TieredStorage;

use crate::config::StorageConfig;
use crate::error::StorageError;
use crate::events::EventBus;
use crate::record::AdvertisementRecord;
use chrono::{DateTime, Duration as ChronoDuration, DurationRound, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Durability level of a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StorageTier {
    Sqlite,
    KeyValue,
    Memory,
}

impl StorageTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageTier::Sqlite => "sqlite",
            StorageTier::KeyValue => "key-value",
            StorageTier::Memory => "memory",
        }
    }
}

impl fmt::Display for StorageTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One storage tier; calls block and are run off the async executor by [`TieredStorage`]
pub trait RecordBackend: Send + Sync {
    fn tier(&self) -> StorageTier;

    /// Append records in order, all or nothing
    fn append(&self, records: &[AdvertisementRecord]) -> Result<(), StorageError>;

    /// Every stored record in insertion order
    fn load_all(&self) -> Result<Vec<AdvertisementRecord>, StorageError>;

    /// Records with `timestamp >= cutoff`
    fn count_since(&self, cutoff: DateTime<Utc>) -> Result<usize, StorageError> {
        Ok(self
            .load_all()?
            .iter()
            .filter(|record| record.timestamp >= cutoff)
            .count())
    }

    fn clear(&self) -> Result<(), StorageError>;
}

#[derive(Debug, Clone, Serialize)]
pub struct StorageStats {
    pub active_tier: StorageTier,
    pub pending_records: usize,
    pub flushed_records: u64,
}

/// Storage facade: tier selection plus optional write batching
pub struct RecordStore {
    storage: Arc<TieredStorage>,
    batcher: Option<WriteBatcher>,
}

impl RecordStore {
    /// Open the configured tiers; fails only when no tier at all is usable
    pub fn open(config: &StorageConfig, event_bus: Option<Arc<EventBus>>) -> Result<Self, StorageError> {
        let mut storage = TieredStorage::open(config)?;
        if let Some(bus) = &event_bus {
            storage = storage.with_event_bus(bus.clone());
        }

        let flush_delay = config
            .batch_writes
            .then(|| Duration::from_millis(config.flush_delay_ms));
        Ok(Self::new(storage, flush_delay, event_bus))
    }

    /// Wrap an assembled tier chain; `flush_delay` of `None` writes every record directly
    pub fn new(
        storage: TieredStorage,
        flush_delay: Option<Duration>,
        event_bus: Option<Arc<EventBus>>,
    ) -> Self {
        let storage = Arc::new(storage);
        let batcher = flush_delay.map(|delay| WriteBatcher::new(storage.clone(), delay, event_bus));

        Self { storage, batcher }
    }

    /// Persist a record; with batching enabled this only queues it
    pub async fn put(&self, record: AdvertisementRecord) -> Result<(), StorageError> {
        match &self.batcher {
            Some(batcher) => {
                batcher.enqueue(record);
                Ok(())
            }
            None => self.storage.append(vec![record]).await.map(|_| ()),
        }
    }

    /// Commit queued records now
    pub async fn flush(&self) -> Result<usize, StorageError> {
        match &self.batcher {
            Some(batcher) => batcher.flush().await,
            None => Ok(0),
        }
    }

    /// Every record on the active tier, including ones still queued
    pub async fn get_all(&self) -> Result<Vec<AdvertisementRecord>, StorageError> {
        self.flush().await?;
        self.storage.load_all().await
    }

    /// Records observed within the last `seconds` before `now`
    pub async fn count_since(&self, seconds: u64, now: DateTime<Utc>) -> Result<usize, StorageError> {
        self.flush().await?;
        let window = ChronoDuration::seconds(seconds.min(u32::MAX as u64) as i64);
        let cutoff = now.checked_sub_signed(window).unwrap_or(DateTime::<Utc>::MIN_UTC);
        // Stored timestamps carry milliseconds; every tier compares at that precision
        let cutoff = cutoff
            .duration_trunc(ChronoDuration::milliseconds(1))
            .unwrap_or(cutoff);
        self.storage.count_since(cutoff).await
    }

    /// Bulk delete on every tier
    pub async fn clear(&self) -> Result<(), StorageError> {
        self.flush().await?;
        self.storage.clear().await?;
        info!("Cleared all stored records");
        Ok(())
    }

    pub fn active_tier(&self) -> StorageTier {
        self.storage.active_tier()
    }

    pub fn stats(&self) -> StorageStats {
        StorageStats {
            active_tier: self.active_tier(),
            pending_records: self.batcher.as_ref().map_or(0, WriteBatcher::pending),
            flushed_records: self.batcher.as_ref().map_or(0, WriteBatcher::flushed_records),
        }
    }
}
