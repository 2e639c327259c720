//! Liveness watchdog for the advertisement source.
//!
//! A stalled scan producer is only visible as silence. Each poll compares the
//! time since the last advertisement against two thresholds: past the soft one
//! the producer is quickly resubscribed, past the hard one a full resync runs.
//! The silence clock is reset after either action whether or not the restart
//! worked, so a dead producer is retried once per threshold instead of on
//! every poll.

use crate::clock::Clock;
use crate::config::WatchdogConfig;
use crate::events::{BeaconEvent, EventBus};
use crate::ingest::Liveness;
use crate::scanner::ScanController;
use crate::storage::RecordStore;
use chrono::Duration as ChronoDuration;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogAction {
    None,
    QuickResubscribe,
    FullResync,
}

pub struct Watchdog {
    config: WatchdogConfig,
    fast_mode: AtomicBool,
    liveness: Arc<Liveness>,
    scanner: Arc<ScanController>,
    store: Arc<RecordStore>,
    clock: Arc<dyn Clock>,
    event_bus: Option<Arc<EventBus>>,
}

impl Watchdog {
    pub fn new(
        config: WatchdogConfig,
        liveness: Arc<Liveness>,
        scanner: Arc<ScanController>,
        store: Arc<RecordStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            fast_mode: AtomicBool::new(config.fast_mode),
            config,
            liveness,
            scanner,
            store,
            clock,
            event_bus: None,
        }
    }

    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    /// High advertisement rate mode uses the shorter soft threshold
    pub fn set_fast_mode(&self, fast: bool) {
        self.fast_mode.store(fast, Ordering::SeqCst);
    }

    pub fn is_fast_mode(&self) -> bool {
        self.fast_mode.load(Ordering::SeqCst)
    }

    fn soft_threshold(&self) -> ChronoDuration {
        let seconds = if self.is_fast_mode() {
            self.config.fast_soft_threshold_seconds
        } else {
            self.config.soft_threshold_seconds
        };
        seconds_to_duration(seconds)
    }

    fn hard_threshold(&self) -> ChronoDuration {
        seconds_to_duration(self.config.hard_threshold_seconds)
    }

    /// Action for a given silence; the hard threshold is checked first
    pub fn evaluate(&self, silent_for: ChronoDuration) -> WatchdogAction {
        if silent_for > self.hard_threshold() {
            WatchdogAction::FullResync
        } else if silent_for > self.soft_threshold() {
            WatchdogAction::QuickResubscribe
        } else {
            WatchdogAction::None
        }
    }

    /// One watchdog tick
    pub async fn poll_once(&self) -> WatchdogAction {
        let silent_for = self.liveness.elapsed(self.clock.now());
        let action = self.evaluate(silent_for);
        let silent_seconds = silent_for.num_seconds().max(0) as u64;

        match action {
            WatchdogAction::None => {}
            WatchdogAction::QuickResubscribe => {
                self.publish(BeaconEvent::WatchdogResubscribe { silent_seconds })
                    .await;
                if let Err(e) = self.scanner.restart(Duration::ZERO).await {
                    warn!("Quick resubscribe failed: {}", e);
                }
                self.liveness.reset(self.clock.now());
            }
            WatchdogAction::FullResync => {
                self.full_resync(silent_seconds).await;
            }
        }

        action
    }

    /// Flush pending writes, stop, wait, start, notify
    pub async fn full_resync(&self, silent_seconds: u64) {
        info!("Full resync of {}", self.scanner.producer_name());

        if let Err(e) = self.store.flush().await {
            warn!("Flush before resync failed: {}", e);
        }

        let delay = Duration::from_millis(self.config.resync_delay_ms);
        if let Err(e) = self.scanner.restart(delay).await {
            warn!("Resync restart failed: {}", e);
        }
        self.liveness.reset(self.clock.now());

        self.publish(BeaconEvent::WatchdogResync { silent_seconds })
            .await;
    }

    /// Poll every `poll_interval_ms` until cancelled
    pub async fn run(&self, cancel: CancellationToken) {
        let mut interval =
            tokio::time::interval(Duration::from_millis(self.config.poll_interval_ms.max(1)));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        debug!(
            "Watchdog running (soft {}s, hard {}s, fast mode {})",
            self.soft_threshold().num_seconds(),
            self.hard_threshold().num_seconds(),
            self.is_fast_mode()
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    self.poll_once().await;
                }
            }
        }

        debug!("Watchdog stopped");
    }

    async fn publish(&self, event: BeaconEvent) {
        if let Some(bus) = &self.event_bus {
            let _ = bus.publish(event).await;
        }
    }
}

fn seconds_to_duration(seconds: u64) -> ChronoDuration {
    ChronoDuration::seconds(seconds.min(u32::MAX as u64) as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::record::AdvertisementRecord;
    use crate::scanner::{MockScanner, ScanProducer};
    use crate::storage::{MemoryBackend, RecordBackend, TieredStorage};
    use chrono::{TimeZone, Utc};
    use tokio::sync::mpsc;

    struct Harness {
        clock: ManualClock,
        producer: Arc<MockScanner>,
        liveness: Arc<Liveness>,
        store: Arc<RecordStore>,
        watchdog: Watchdog,
        _rx: mpsc::Receiver<crate::record::AdvertisementEvent>,
    }

    async fn harness(fast_mode: bool) -> Harness {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap());
        let producer = Arc::new(MockScanner::new());
        let (tx, rx) = mpsc::channel(16);
        let scanner = Arc::new(ScanController::new(producer.clone(), tx, None));
        scanner.start().await.unwrap();

        let tiers: Vec<Arc<dyn RecordBackend>> = vec![Arc::new(MemoryBackend::new())];
        let store = Arc::new(RecordStore::new(
            TieredStorage::new(tiers).unwrap(),
            Some(Duration::from_secs(60)),
            None,
        ));
        let liveness = Arc::new(Liveness::new(clock.now()));

        let config = WatchdogConfig {
            fast_mode,
            resync_delay_ms: 1,
            ..crate::config::BeaconConfig::default().watchdog
        };
        let watchdog = Watchdog::new(
            config,
            liveness.clone(),
            scanner,
            store.clone(),
            Arc::new(clock.clone()),
        );

        Harness {
            clock,
            producer,
            liveness,
            store,
            watchdog,
            _rx: rx,
        }
    }

    #[tokio::test]
    async fn test_thresholds() {
        let h = harness(false).await;
        let w = &h.watchdog;

        assert_eq!(w.evaluate(ChronoDuration::seconds(20)), WatchdogAction::None);
        assert_eq!(
            w.evaluate(ChronoDuration::seconds(21)),
            WatchdogAction::QuickResubscribe
        );
        assert_eq!(
            w.evaluate(ChronoDuration::seconds(61)),
            WatchdogAction::FullResync
        );

        w.set_fast_mode(true);
        assert_eq!(
            w.evaluate(ChronoDuration::seconds(9)),
            WatchdogAction::QuickResubscribe
        );
    }

    #[tokio::test]
    async fn test_quiet_source_is_resubscribed_once() {
        let h = harness(false).await;

        assert_eq!(h.watchdog.poll_once().await, WatchdogAction::None);

        h.clock.advance_ms(25_000);
        assert_eq!(
            h.watchdog.poll_once().await,
            WatchdogAction::QuickResubscribe
        );
        assert_eq!(h.producer.stop_count(), 1);
        assert_eq!(h.producer.start_count(), 2);

        // Silence clock restarted, so the next poll does nothing
        assert_eq!(h.liveness.elapsed(h.clock.now()), ChronoDuration::zero());
        assert_eq!(h.watchdog.poll_once().await, WatchdogAction::None);
    }

    #[tokio::test]
    async fn test_hard_threshold_runs_full_resync() {
        let h = harness(false).await;
        let bus = Arc::new(EventBus::new(8));
        let mut events = bus.subscribe();
        let watchdog = h.watchdog.with_event_bus(bus);

        h.store
            .put(AdvertisementRecord::at(h.clock.now()))
            .await
            .unwrap();
        assert_eq!(h.store.stats().pending_records, 1);

        h.clock.advance_ms(61_000);
        assert_eq!(watchdog.poll_once().await, WatchdogAction::FullResync);

        // Pending writes were flushed before the restart
        assert_eq!(h.store.stats().pending_records, 0);
        assert_eq!(h.producer.start_count(), 2);
        assert!(matches!(
            events.recv().await.unwrap(),
            BeaconEvent::WatchdogResync { silent_seconds: 61 }
        ));
    }

    #[tokio::test]
    async fn test_failed_restart_still_resets_clock() {
        let h = harness(true).await;
        h.producer.fail_start(true);

        h.clock.advance_ms(9_000);
        assert_eq!(
            h.watchdog.poll_once().await,
            WatchdogAction::QuickResubscribe
        );
        assert!(!h.producer.is_active());
        assert_eq!(h.watchdog.poll_once().await, WatchdogAction::None);
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let h = harness(false).await;
        let cancel = CancellationToken::new();
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), h.watchdog.run(cancel))
            .await
            .unwrap();
    }
}
