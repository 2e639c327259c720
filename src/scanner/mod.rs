//! Boundary to the external advertisement source.
//!
//! The raw radio scan is opaque to this crate: a [`ScanProducer`] pushes
//! [`AdvertisementEvent`]s into a bounded channel that the ingest pipeline
//! consumes in order. [`ScanController`] owns the producer and the pipeline's
//! sender so the watchdog can stop and restart scanning without touching the
//! consumer side.

pub mod mock;
pub mod replay;

pub use mock::MockScanner;
pub use replay::ReplayScanner;

use crate::error::ScannerError;
use crate::events::{BeaconEvent, EventBus};
use crate::record::AdvertisementEvent;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Source of advertisement events
#[async_trait]
pub trait ScanProducer: Send + Sync {
    fn name(&self) -> &str;

    /// Begin delivering events into `sink`
    async fn start(&self, sink: mpsc::Sender<AdvertisementEvent>) -> Result<(), ScannerError>;

    /// Stop delivering events
    ///
    /// Implementations must release their sink before (or together with) halting
    /// the underlying scan, so no event is delivered after `stop` returns.
    async fn stop(&self);

    fn is_active(&self) -> bool;
}

/// Start/stop/restart control over one producer feeding one pipeline
///
/// Known race: `restart` does not wait for confirmation that the previous
/// delivery path is fully torn down beyond what `ScanProducer::stop` itself
/// guarantees. A producer whose `stop` returns early could briefly have two
/// delivery paths registered.
pub struct ScanController {
    producer: Arc<dyn ScanProducer>,
    sink: mpsc::Sender<AdvertisementEvent>,
    event_bus: Option<Arc<EventBus>>,
}

impl ScanController {
    pub fn new(
        producer: Arc<dyn ScanProducer>,
        sink: mpsc::Sender<AdvertisementEvent>,
        event_bus: Option<Arc<EventBus>>,
    ) -> Self {
        Self {
            producer,
            sink,
            event_bus,
        }
    }

    pub fn producer_name(&self) -> &str {
        self.producer.name()
    }

    pub fn is_active(&self) -> bool {
        self.producer.is_active()
    }

    /// Start scanning; a failure is returned with a readable cause and published
    pub async fn start(&self) -> Result<(), ScannerError> {
        let producer = self.producer.name().to_string();

        if self.producer.is_active() {
            debug!("Scan producer {} already active", producer);
            return Ok(());
        }

        match self.producer.start(self.sink.clone()).await {
            Ok(()) => {
                info!("Scan started ({})", producer);
                self.publish(BeaconEvent::ScanStarted { producer }).await;
                Ok(())
            }
            Err(e) => {
                self.publish(BeaconEvent::ScanStartFailed {
                    producer,
                    error: e.to_string(),
                })
                .await;
                Err(e)
            }
        }
    }

    pub async fn stop(&self) {
        let producer = self.producer.name().to_string();
        self.producer.stop().await;
        info!("Scan stopped ({})", producer);
        self.publish(BeaconEvent::ScanStopped { producer }).await;
    }

    /// Stop, wait `delay`, start again
    pub async fn restart(&self, delay: Duration) -> Result<(), ScannerError> {
        self.stop().await;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.start().await
    }

    async fn publish(&self, event: BeaconEvent) {
        if let Some(bus) = &self.event_bus {
            let _ = bus.publish(event).await;
        }
    }
}
