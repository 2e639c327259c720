use super::ScanProducer;
use crate::error::ScannerError;
use crate::record::AdvertisementEvent;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::mpsc;
use tracing::debug;

/// Scripted scan producer for tests and dry runs
///
/// Scripted events are delivered on every start; further events can be pushed
/// with [`MockScanner::emit`] while the scanner is active.
#[derive(Default)]
pub struct MockScanner {
    script: Mutex<Vec<AdvertisementEvent>>,
    sink: Mutex<Option<mpsc::Sender<AdvertisementEvent>>>,
    fail_start: AtomicBool,
    starts: AtomicUsize,
    stops: AtomicUsize,
}

impl MockScanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_script(events: Vec<AdvertisementEvent>) -> Self {
        let scanner = Self::default();
        *scanner.script.lock() = events;
        scanner
    }

    /// Make subsequent starts fail
    pub fn fail_start(&self, fail: bool) {
        self.fail_start.store(fail, Ordering::SeqCst);
    }

    /// Deliver an event now; false when not started or the consumer is gone
    pub async fn emit(&self, event: AdvertisementEvent) -> bool {
        let sink = self.sink.lock().clone();
        match sink {
            Some(sink) => sink.send(event).await.is_ok(),
            None => false,
        }
    }

    pub fn start_count(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ScanProducer for MockScanner {
    fn name(&self) -> &str {
        "mock"
    }

    async fn start(&self, sink: mpsc::Sender<AdvertisementEvent>) -> Result<(), ScannerError> {
        self.starts.fetch_add(1, Ordering::SeqCst);

        if self.fail_start.load(Ordering::SeqCst) {
            return Err(ScannerError::StartFailed {
                producer: self.name().to_string(),
                details: "scripted start failure".to_string(),
            });
        }

        let script = self.script.lock().clone();
        for event in script {
            if sink.send(event).await.is_err() {
                break;
            }
        }

        *self.sink.lock() = Some(sink);
        debug!("Mock scanner started");
        Ok(())
    }

    async fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.sink.lock().take();
    }

    fn is_active(&self) -> bool {
        self.sink.lock().is_some()
    }
}
