//! Advertisement ingest: normalize, enrich and persist one event at a time.

use crate::clock::Clock;
use crate::config::{BeaconConfig, DistanceConfig};
use crate::decoder;
use crate::device::DeviceKey;
use crate::distance::estimate_from_dbm;
use crate::error::StorageError;
use crate::events::{BeaconEvent, EventBus};
use crate::profiler;
use crate::record::{AdvertisementEvent, AdvertisementRecord, GeoFix};
use crate::session::SessionManager;
use crate::storage::RecordStore;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};

/// Time of the last observed advertisement, shared with the watchdog
#[derive(Debug)]
pub struct Liveness {
    last_event_ms: AtomicI64,
}

impl Liveness {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            last_event_ms: AtomicI64::new(now.timestamp_millis()),
        }
    }

    /// Mark an event as observed at `now`
    pub fn touch(&self, now: DateTime<Utc>) {
        self.last_event_ms
            .store(now.timestamp_millis(), Ordering::SeqCst);
    }

    /// Restart the silence clock without an event (after a watchdog action)
    pub fn reset(&self, now: DateTime<Utc>) {
        self.touch(now);
    }

    pub fn last_event(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.last_event_ms.load(Ordering::SeqCst))
            .single()
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Silence so far; never negative
    pub fn elapsed(&self, now: DateTime<Utc>) -> ChronoDuration {
        let elapsed = now.timestamp_millis() - self.last_event_ms.load(Ordering::SeqCst);
        ChronoDuration::milliseconds(elapsed.max(0))
    }
}

#[derive(Debug, Default)]
struct StatsInner {
    packets: u64,
    per_device: HashMap<DeviceKey, u64>,
}

/// Packet tallies per device key
#[derive(Debug, Default)]
pub struct IngestStats {
    inner: Mutex<StatsInner>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IngestSnapshot {
    pub packets: u64,
    pub unique_devices: usize,
}

impl IngestStats {
    pub fn record(&self, key: DeviceKey) {
        let mut inner = self.inner.lock();
        inner.packets += 1;
        *inner.per_device.entry(key).or_insert(0) += 1;
    }

    pub fn snapshot(&self) -> IngestSnapshot {
        let inner = self.inner.lock();
        IngestSnapshot {
            packets: inner.packets,
            unique_devices: inner.per_device.len(),
        }
    }

    /// The `n` most active devices, by packet count then key
    pub fn top_devices(&self, n: usize) -> Vec<(DeviceKey, u64)> {
        let inner = self.inner.lock();
        let mut devices: Vec<(DeviceKey, u64)> = inner
            .per_device
            .iter()
            .map(|(key, count)| (key.clone(), *count))
            .collect();
        devices.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        devices.truncate(n);
        devices
    }
}

/// Tally stored records per device, used by the export tool
pub fn tally<'a, I>(records: I) -> IngestStats
where
    I: IntoIterator<Item = &'a AdvertisementRecord>,
{
    let stats = IngestStats::default();
    for record in records {
        stats.record(DeviceKey::of(record));
    }
    stats
}

/// Single consumer of the advertisement channel
pub struct IngestPipeline {
    sessions: Mutex<SessionManager>,
    store: Arc<RecordStore>,
    liveness: Arc<Liveness>,
    clock: Arc<dyn Clock>,
    distance: DistanceConfig,
    position: RwLock<Option<GeoFix>>,
    stats: Arc<IngestStats>,
    event_bus: Option<Arc<EventBus>>,
}

impl IngestPipeline {
    pub fn new(config: &BeaconConfig, store: Arc<RecordStore>, clock: Arc<dyn Clock>) -> Self {
        let liveness = Arc::new(Liveness::new(clock.now()));
        Self {
            sessions: Mutex::new(SessionManager::from_config(&config.session)),
            store,
            liveness,
            clock,
            distance: config.distance.clone(),
            position: RwLock::new(None),
            stats: Arc::new(IngestStats::default()),
            event_bus: None,
        }
    }

    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn with_sessions(mut self, sessions: SessionManager) -> Self {
        self.sessions = Mutex::new(sessions);
        self
    }

    pub fn liveness(&self) -> Arc<Liveness> {
        self.liveness.clone()
    }

    pub fn stats(&self) -> Arc<IngestStats> {
        self.stats.clone()
    }

    pub fn store(&self) -> Arc<RecordStore> {
        self.store.clone()
    }

    /// Latest position fix attached to subsequent records
    pub fn set_position(&self, fix: Option<GeoFix>) {
        *self.position.write() = fix;
    }

    /// Normalize a raw event into a record shape with every field explicitly present or absent
    pub fn normalize(
        &self,
        event: AdvertisementEvent,
        timestamp: DateTime<Utc>,
        session_id: String,
    ) -> AdvertisementRecord {
        let mut record = AdvertisementRecord::at(timestamp);

        record.device_name = event.device_name;
        record.rssi = event
            .rssi
            .filter(|value| value.is_finite())
            .map(|value| value.trunc() as i32);
        record.tx_power = event
            .tx_power
            .filter(|value| value.is_finite())
            .map(|value| value.trunc() as i32);

        for uuid in event.service_uuids.unwrap_or_default() {
            if !record.service_uuids.contains(&uuid) {
                record.service_uuids.push(uuid);
            }
        }

        if let Some(fix) = *self.position.read() {
            record.latitude = Some(fix.latitude);
            record.longitude = Some(fix.longitude);
        }

        record.session_id = session_id;
        record.manufacturer_data = decoder::manufacturer_to_hex(&event.manufacturer_data);
        record.service_data = decoder::service_to_hex(&event.service_data);
        record.beacon = decoder::decode(&event.manufacturer_data, &event.service_data);

        record
    }

    /// Enrich and persist one advertisement
    pub async fn process(&self, event: AdvertisementEvent) -> Result<AdvertisementRecord, StorageError> {
        let now = self.clock.now();
        self.liveness.touch(now);

        let session = self.sessions.lock().session_id_at(now);
        if session.rolled {
            self.publish(BeaconEvent::SessionRolled {
                session_id: session.id.clone(),
            })
            .await;
        }

        let mut record = self.normalize(event, now, session.id);

        let calibration = record
            .calibration_power()
            .unwrap_or(self.distance.reference_power_dbm);
        record.distance_m = estimate_from_dbm(
            record.rssi,
            Some(calibration),
            self.distance.path_loss_exponent,
        );

        let classification = profiler::profile(&record);
        record.category = classification.category;
        record.vendor = classification.vendor;
        record.icon = classification.icon;

        trace!(
            "Advertisement from {:?} rssi={:?} type={:?}",
            record.device_name,
            record.rssi,
            record.beacon.beacon_type
        );

        self.store.put(record.clone()).await?;
        self.stats.record(DeviceKey::of(&record));

        Ok(record)
    }

    /// Consume the advertisement channel until cancelled or every sender is gone
    ///
    /// Events already buffered when cancellation arrives are still processed.
    pub async fn run(&self, mut events: mpsc::Receiver<AdvertisementEvent>, cancel: CancellationToken) {
        info!("Ingest pipeline running");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Ingest pipeline cancelled, draining buffered events");
                    break;
                }
                event = events.recv() => match event {
                    Some(event) => self.handle(event).await,
                    None => {
                        debug!("Advertisement channel closed");
                        break;
                    }
                }
            }
        }

        while let Ok(event) = events.try_recv() {
            self.handle(event).await;
        }

        let snapshot = self.stats.snapshot();
        info!(
            "Ingest pipeline stopped after {} packets from {} devices",
            snapshot.packets, snapshot.unique_devices
        );
    }

    async fn handle(&self, event: AdvertisementEvent) {
        if let Err(e) = self.process(event).await {
            error!("Failed to store advertisement: {}", e);
            self.publish(BeaconEvent::SystemError {
                component: "ingest".to_string(),
                error: e.to_string(),
            })
            .await;
        }
    }

    async fn publish(&self, event: BeaconEvent) {
        if let Some(bus) = &self.event_bus {
            let _ = bus.publish(event).await;
        }
    }
}
