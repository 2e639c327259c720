use super::orchestrator::{deliver_shutdown, ShutdownSender};
use super::{ComponentState, ScanOrchestrator, ShutdownReason};
use crate::clock::Clock;
use crate::error::{BeaconError, Result, ScannerError};
use crate::events::{BeaconEvent, EventFilter, EventReceiver};
use crate::ingest::IngestPipeline;
use crate::keyboard_input::KeyboardInputHandler;
use crate::scanner::ScanController;
use crate::storage::RecordStore;
use crate::watchdog::Watchdog;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

impl ScanOrchestrator {
    /// Open storage and register components
    ///
    /// Fails only when no storage tier at all can be opened.
    pub async fn initialize(&mut self) -> Result<()> {
        info!("Initializing beacontrail components");

        {
            let mut states = self.component_states.lock().await;
            for component in ["storage", "ingest", "scanner", "monitor"] {
                states.insert(component.to_string(), ComponentState::Stopped);
            }
            if self.config.watchdog.enabled {
                states.insert("watchdog".to_string(), ComponentState::Stopped);
            }
            if self.keyboard_enabled {
                states.insert("keyboard".to_string(), ComponentState::Stopped);
            }
        }

        self.set_component_state("storage", ComponentState::Starting)
            .await;
        let store = match RecordStore::open(&self.config.storage, Some(Arc::clone(&self.event_bus))) {
            Ok(store) => store,
            Err(e) => {
                self.set_component_state("storage", ComponentState::Failed)
                    .await;
                error!("Failed to open storage: {}", e);
                return Err(e.into());
            }
        };
        info!("Storage ready on {} tier", store.active_tier());
        self.store = Some(Arc::new(store));
        self.set_component_state("storage", ComponentState::Running)
            .await;

        info!("All components initialized successfully");
        Ok(())
    }

    /// Start ingest, scanning, the watchdog, the status monitor and the optional hotkeys
    pub async fn start(&mut self) -> Result<()> {
        info!("Starting beacontrail");

        let store = self
            .store
            .clone()
            .ok_or_else(|| BeaconError::system("start() called before initialize()"))?;

        // Ingest consumer first, so nothing the producer sends is left unread
        self.set_component_state("ingest", ComponentState::Starting)
            .await;
        let (sender, receiver) = mpsc::channel(self.config.scanner.channel_capacity);
        let pipeline = Arc::new(
            IngestPipeline::new(&self.config, Arc::clone(&store), Arc::clone(&self.clock))
                .with_event_bus(Arc::clone(&self.event_bus)),
        );
        let pipeline_task = {
            let pipeline = Arc::clone(&pipeline);
            let token = self.pipeline_token.clone();
            tokio::spawn(async move { pipeline.run(receiver, token).await })
        };
        self.pipeline = Some(Arc::clone(&pipeline));
        self.pipeline_task = Some(pipeline_task);
        self.set_component_state("ingest", ComponentState::Running)
            .await;

        // Scan producer
        self.set_component_state("scanner", ComponentState::Starting)
            .await;
        let producer = match self.producer.clone() {
            Some(producer) => producer,
            None => {
                self.set_component_state("scanner", ComponentState::Failed)
                    .await;
                let e = ScannerError::NotAvailable {
                    details: "no scan producer configured (set scanner.replay_path or pass --replay)"
                        .to_string(),
                };
                error!("Failed to start scanning: {}", e);
                return Err(e.into());
            }
        };
        let scanner = Arc::new(ScanController::new(
            producer,
            sender,
            Some(Arc::clone(&self.event_bus)),
        ));
        if let Err(e) = scanner.start().await {
            self.set_component_state("scanner", ComponentState::Failed)
                .await;
            error!("Failed to start scanning: {}", e);
            return Err(e.into());
        }
        self.scanner = Some(Arc::clone(&scanner));
        self.set_component_state("scanner", ComponentState::Running)
            .await;

        // Watchdog; built even when disabled so manual resyncs share its logic
        let watchdog = Arc::new(
            Watchdog::new(
                self.config.watchdog.clone(),
                pipeline.liveness(),
                Arc::clone(&scanner),
                Arc::clone(&store),
                Arc::clone(&self.clock),
            )
            .with_event_bus(Arc::clone(&self.event_bus)),
        );
        if self.config.watchdog.enabled {
            self.set_component_state("watchdog", ComponentState::Starting)
                .await;
            let task = {
                let watchdog = Arc::clone(&watchdog);
                let token = self.cancellation_token.clone();
                tokio::spawn(async move { watchdog.run(token).await })
            };
            self.watchdog_task = Some(task);
            self.set_component_state("watchdog", ComponentState::Running)
                .await;
            info!(
                "Watchdog started (fast mode {})",
                if watchdog.is_fast_mode() { "on" } else { "off" }
            );
        }
        self.watchdog = Some(Arc::clone(&watchdog));

        // Status notifications and periodic report
        self.set_component_state("monitor", ComponentState::Starting)
            .await;
        let monitor = Monitor {
            events: self.event_bus.subscribe_filtered(
                EventFilter::event_types(vec![
                    "resync_requested",
                    "shutdown_requested",
                    "watchdog_resync",
                    "storage_demoted",
                    "scan_start_failed",
                    "system_error",
                ]),
                "monitor",
            ),
            pipeline,
            watchdog,
            clock: Arc::clone(&self.clock),
            report_every: (self.config.system.stats_report_seconds > 0)
                .then(|| Duration::from_secs(self.config.system.stats_report_seconds)),
            shutdown: Arc::clone(&self.shutdown_sender),
        };
        let token = self.cancellation_token.clone();
        self.monitor_task = Some(tokio::spawn(monitor.run(token)));
        self.set_component_state("monitor", ComponentState::Running)
            .await;

        if self.keyboard_enabled {
            self.set_component_state("keyboard", ComponentState::Starting)
                .await;
            let handler = KeyboardInputHandler::new(Arc::clone(&self.event_bus));
            handler.start().await.map_err(|e| {
                error!("Failed to start keyboard input handler: {}", e);
                e
            })?;
            self.keyboard_handler = Some(handler);
            self.set_component_state("keyboard", ComponentState::Running)
                .await;
        }

        info!("beacontrail started, scanning via {}", scanner.producer_name());
        Ok(())
    }
}

/// Reacts to bus notifications and logs the periodic status line
struct Monitor {
    events: EventReceiver,
    pipeline: Arc<IngestPipeline>,
    watchdog: Arc<Watchdog>,
    clock: Arc<dyn Clock>,
    report_every: Option<Duration>,
    shutdown: ShutdownSender,
}

impl Monitor {
    async fn run(mut self, cancel: CancellationToken) {
        let period = self.report_every.unwrap_or(Duration::from_secs(3600));
        let mut report =
            tokio::time::interval_at(tokio::time::Instant::now() + period, period);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = report.tick(), if self.report_every.is_some() => self.report(),
                event = self.events.recv() => match event {
                    Ok(event) => self.handle(event).await,
                    Err(_) => break,
                }
            }
        }
    }

    fn report(&self) {
        let silent = self.pipeline.liveness().elapsed(self.clock.now());
        let snapshot = self.pipeline.stats().snapshot();
        info!(
            "Last packet {} s ago, {} packets, {} unique devices",
            silent.num_seconds(),
            snapshot.packets,
            snapshot.unique_devices
        );
    }

    async fn handle(&self, event: BeaconEvent) {
        match event {
            BeaconEvent::ResyncRequested { reason } => {
                info!("Manual resync: {}", reason);
                let silent = self.pipeline.liveness().elapsed(self.clock.now());
                self.watchdog
                    .full_resync(silent.num_seconds().max(0) as u64)
                    .await;
            }
            BeaconEvent::ShutdownRequested { reason, .. } => {
                info!("Shutdown requested: {}", reason);
                deliver_shutdown(&self.shutdown, ShutdownReason::UserRequest).await;
            }
            BeaconEvent::WatchdogResync { silent_seconds } => {
                warn!("Scanning resynced after {}s without packets", silent_seconds);
            }
            other => warn!("{}", other.description()),
        }
    }
}
