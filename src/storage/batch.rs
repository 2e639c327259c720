use super::tiered::TieredStorage;
use crate::error::StorageError;
use crate::events::{BeaconEvent, EventBus};
use crate::record::AdvertisementRecord;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

#[derive(Default)]
struct BatchState {
    queue: Vec<AdvertisementRecord>,
    scheduled: bool,
}

struct BatchInner {
    storage: Arc<TieredStorage>,
    flush_delay: Duration,
    state: Mutex<BatchState>,
    flush_lock: tokio::sync::Mutex<()>,
    flushed_records: AtomicU64,
    event_bus: Option<Arc<EventBus>>,
}

/// Debounced write queue in front of [`TieredStorage`]
///
/// The first record into an idle queue schedules a flush `flush_delay` later;
/// everything that arrives meanwhile rides along in the same transaction. A
/// flush takes the whole queue out from under the lock before writing, so new
/// records never touch a batch that is being committed.
#[derive(Clone)]
pub struct WriteBatcher {
    inner: Arc<BatchInner>,
}

impl WriteBatcher {
    pub fn new(
        storage: Arc<TieredStorage>,
        flush_delay: Duration,
        event_bus: Option<Arc<EventBus>>,
    ) -> Self {
        Self {
            inner: Arc::new(BatchInner {
                storage,
                flush_delay,
                state: Mutex::new(BatchState::default()),
                flush_lock: tokio::sync::Mutex::new(()),
                flushed_records: AtomicU64::new(0),
                event_bus,
            }),
        }
    }

    /// Queue a record; must be called from within a tokio runtime
    pub fn enqueue(&self, record: AdvertisementRecord) {
        let schedule = {
            let mut state = self.inner.state.lock();
            state.queue.push(record);
            !std::mem::replace(&mut state.scheduled, true)
        };

        if schedule {
            let inner = self.inner.clone();
            tokio::spawn(async move {
                inner.run_scheduled().await;
            });
        }
    }

    /// Commit everything queued so far
    pub async fn flush(&self) -> Result<usize, StorageError> {
        self.inner.flush_pending().await
    }

    pub fn pending(&self) -> usize {
        self.inner.state.lock().queue.len()
    }

    pub fn flushed_records(&self) -> u64 {
        self.inner.flushed_records.load(Ordering::Relaxed)
    }
}

impl BatchInner {
    async fn run_scheduled(self: Arc<Self>) {
        loop {
            tokio::time::sleep(self.flush_delay).await;

            if let Err(e) = self.flush_pending().await {
                error!("Scheduled flush failed: {}", e);
            }

            let idle = {
                let mut state = self.state.lock();
                if state.queue.is_empty() {
                    state.scheduled = false;
                }
                !state.scheduled
            };
            if idle {
                break;
            }
        }
    }

    async fn flush_pending(&self) -> Result<usize, StorageError> {
        let _flush = self.flush_lock.lock().await;

        let batch = std::mem::take(&mut self.state.lock().queue);
        if batch.is_empty() {
            return Ok(0);
        }

        let count = batch.len();
        match self.storage.append(batch).await {
            Ok(tier) => {
                self.flushed_records.fetch_add(count as u64, Ordering::Relaxed);
                debug!("Flushed {} records to {} tier", count, tier);
                if let Some(bus) = &self.event_bus {
                    let _ = bus
                        .publish(BeaconEvent::StorageFlushed {
                            records: count,
                            tier: tier.to_string(),
                        })
                        .await;
                }
                Ok(count)
            }
            Err(e) => {
                error!("Dropping {} records, no storage tier accepted them: {}", count, e);
                if let Some(bus) = &self.event_bus {
                    let _ = bus
                        .publish(BeaconEvent::SystemError {
                            component: "storage".to_string(),
                            error: e.to_string(),
                        })
                        .await;
                }
                Err(e)
            }
        }
    }
}
