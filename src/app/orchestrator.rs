use super::types::{ComponentState, ShutdownReason};
use crate::clock::{Clock, SystemClock};
use crate::config::BeaconConfig;
use crate::error::Result;
use crate::events::EventBus;
use crate::ingest::IngestPipeline;
use crate::keyboard_input::KeyboardInputHandler;
use crate::scanner::{ReplayScanner, ScanController, ScanProducer};
use crate::storage::RecordStore;
use crate::watchdog::Watchdog;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub(super) type ShutdownSender = Arc<Mutex<Option<oneshot::Sender<ShutdownReason>>>>;

/// Wires storage, ingest, scanning and the watchdog into one daemon
pub struct ScanOrchestrator {
    pub(super) config: BeaconConfig,
    pub(super) event_bus: Arc<EventBus>,
    pub(super) clock: Arc<dyn Clock>,
    pub(super) producer: Option<Arc<dyn ScanProducer>>,

    // Components, assembled by initialize() and start()
    pub(super) store: Option<Arc<RecordStore>>,
    pub(super) pipeline: Option<Arc<IngestPipeline>>,
    pub(super) scanner: Option<Arc<ScanController>>,
    pub(super) watchdog: Option<Arc<Watchdog>>,
    pub(super) keyboard_handler: Option<KeyboardInputHandler>,
    pub(super) keyboard_enabled: bool,

    // Background tasks
    pub(super) pipeline_task: Option<JoinHandle<()>>,
    pub(super) watchdog_task: Option<JoinHandle<()>>,
    pub(super) monitor_task: Option<JoinHandle<()>>,

    // Lifecycle management
    pub(super) component_states: Arc<Mutex<HashMap<String, ComponentState>>>,
    pub(super) shutdown_sender: ShutdownSender,
    pub(super) shutdown_receiver: Option<oneshot::Receiver<ShutdownReason>>,
    /// Stops the watchdog and monitor tasks
    pub(super) cancellation_token: CancellationToken,
    /// Stops the ingest consumer; cancelled only after scanning has stopped
    pub(super) pipeline_token: CancellationToken,
}

impl ScanOrchestrator {
    /// Create an orchestrator; the replay capture from the config, if any, is the scan producer
    pub fn new(config: BeaconConfig) -> Result<Self> {
        let event_bus = Arc::new(EventBus::new(config.system.event_bus_capacity));
        let producer = ReplayScanner::from_config(&config.scanner)
            .map(|replay| Arc::new(replay) as Arc<dyn ScanProducer>);
        let (shutdown_sender, shutdown_receiver) = oneshot::channel();

        if let Some(producer) = &producer {
            info!("Using scan producer: {}", producer.name());
        }

        Ok(Self {
            config,
            event_bus,
            clock: Arc::new(SystemClock),
            producer,
            store: None,
            pipeline: None,
            scanner: None,
            watchdog: None,
            keyboard_handler: None,
            keyboard_enabled: false,
            pipeline_task: None,
            watchdog_task: None,
            monitor_task: None,
            component_states: Arc::new(Mutex::new(HashMap::new())),
            shutdown_sender: Arc::new(Mutex::new(Some(shutdown_sender))),
            shutdown_receiver: Some(shutdown_receiver),
            cancellation_token: CancellationToken::new(),
            pipeline_token: CancellationToken::new(),
        })
    }

    /// Replace the scan producer (a platform radio binding, or a test double)
    pub fn with_producer(mut self, producer: Arc<dyn ScanProducer>) -> Self {
        self.producer = Some(producer);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Enable or disable the terminal hotkeys
    pub fn set_keyboard_enabled(&mut self, enabled: bool) {
        self.keyboard_enabled = enabled;
    }

    pub fn config(&self) -> &BeaconConfig {
        &self.config
    }

    pub fn event_bus(&self) -> Arc<EventBus> {
        Arc::clone(&self.event_bus)
    }

    /// The record store, once initialized
    pub fn store(&self) -> Option<Arc<RecordStore>> {
        self.store.clone()
    }

    /// The ingest pipeline, once started
    pub fn pipeline(&self) -> Option<Arc<IngestPipeline>> {
        self.pipeline.clone()
    }

    /// Ask the run loop to shut down; later requests are ignored
    pub async fn request_shutdown(&self, reason: ShutdownReason) -> bool {
        deliver_shutdown(&self.shutdown_sender, reason).await
    }
}

pub(super) async fn deliver_shutdown(sender: &ShutdownSender, reason: ShutdownReason) -> bool {
    match sender.lock().await.take() {
        Some(sender) => sender.send(reason).is_ok(),
        None => false,
    }
}
