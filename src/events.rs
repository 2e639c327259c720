use crate::error::EventBusError;
use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Status notifications exchanged between beacontrail components
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum BeaconEvent {
    /// The scan producer started delivering advertisements
    ScanStarted { producer: String },
    /// The scan producer was halted
    ScanStopped { producer: String },
    /// The scan producer could not be started
    ScanStartFailed { producer: String, error: String },
    /// The watchdog restarted a quiet scan producer
    WatchdogResubscribe { silent_seconds: u64 },
    /// The watchdog performed a full resync after a long silence
    WatchdogResync { silent_seconds: u64 },
    /// A manual full resync was requested
    ResyncRequested { reason: String },
    /// A new logical session started
    SessionRolled { session_id: String },
    /// Storage fell back to a less durable tier
    StorageDemoted {
        from: String,
        to: String,
        reason: String,
    },
    /// A batch of queued records was committed
    StorageFlushed { records: usize, tier: String },
    /// A system error occurred in a component
    SystemError { component: String, error: String },
    /// System shutdown requested
    ShutdownRequested {
        timestamp: SystemTime,
        reason: String,
    },
}

impl BeaconEvent {
    /// Get a human-readable description of the event
    pub fn description(&self) -> String {
        match self {
            BeaconEvent::ScanStarted { producer } => format!("Scan started ({})", producer),
            BeaconEvent::ScanStopped { producer } => format!("Scan stopped ({})", producer),
            BeaconEvent::ScanStartFailed { producer, error } => {
                format!("Scan start failed ({}): {}", producer, error)
            }
            BeaconEvent::WatchdogResubscribe { silent_seconds } => {
                format!("Quick resubscribe after {}s without packets", silent_seconds)
            }
            BeaconEvent::WatchdogResync { silent_seconds } => {
                format!("Full resync after {}s without packets", silent_seconds)
            }
            BeaconEvent::ResyncRequested { reason } => format!("Resync requested: {}", reason),
            BeaconEvent::SessionRolled { session_id } => format!("Session {} started", session_id),
            BeaconEvent::StorageDemoted { from, to, reason } => {
                format!("Storage demoted from {} to {}: {}", from, to, reason)
            }
            BeaconEvent::StorageFlushed { records, tier } => {
                format!("Flushed {} records to {}", records, tier)
            }
            BeaconEvent::SystemError { component, error } => {
                format!("Error in {}: {}", component, error)
            }
            BeaconEvent::ShutdownRequested { reason, .. } => {
                format!("Shutdown requested: {}", reason)
            }
        }
    }

    /// Get the event type as a string for filtering
    pub fn event_type(&self) -> &'static str {
        match self {
            BeaconEvent::ScanStarted { .. } => "scan_started",
            BeaconEvent::ScanStopped { .. } => "scan_stopped",
            BeaconEvent::ScanStartFailed { .. } => "scan_start_failed",
            BeaconEvent::WatchdogResubscribe { .. } => "watchdog_resubscribe",
            BeaconEvent::WatchdogResync { .. } => "watchdog_resync",
            BeaconEvent::ResyncRequested { .. } => "resync_requested",
            BeaconEvent::SessionRolled { .. } => "session_rolled",
            BeaconEvent::StorageDemoted { .. } => "storage_demoted",
            BeaconEvent::StorageFlushed { .. } => "storage_flushed",
            BeaconEvent::SystemError { .. } => "system_error",
            BeaconEvent::ShutdownRequested { .. } => "shutdown_requested",
        }
    }

    pub fn shutdown<S: Into<String>>(reason: S) -> Self {
        BeaconEvent::ShutdownRequested {
            timestamp: SystemTime::now(),
            reason: reason.into(),
        }
    }
}

/// Async event bus for component coordination using broadcast channels
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<BeaconEvent>,
}

impl EventBus {
    /// Create a new event bus with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to events and get a receiver
    pub fn subscribe(&self) -> broadcast::Receiver<BeaconEvent> {
        self.sender.subscribe()
    }

    /// Subscribe with a filter
    pub fn subscribe_filtered<S: Into<String>>(&self, filter: EventFilter, name: S) -> EventReceiver {
        EventReceiver::new(self.sender.subscribe(), filter, name.into())
    }

    /// Publish an event to all subscribers
    ///
    /// Fails only when nobody is subscribed.
    pub async fn publish(&self, event: BeaconEvent) -> Result<usize, EventBusError> {
        match &event {
            BeaconEvent::ScanStartFailed { producer, error } => {
                error!("Scan producer {} failed to start: {}", producer, error);
            }
            BeaconEvent::WatchdogResubscribe { silent_seconds } => {
                warn!("Watchdog: quick resubscribe after {}s of silence", silent_seconds);
            }
            BeaconEvent::WatchdogResync { silent_seconds } => {
                warn!("Watchdog: full resync after {}s of silence", silent_seconds);
            }
            BeaconEvent::StorageDemoted { from, to, reason } => {
                warn!("Storage demoted {} -> {}: {}", from, to, reason);
            }
            BeaconEvent::SystemError { component, error } => {
                error!("System error in {}: {}", component, error);
            }
            BeaconEvent::ShutdownRequested { reason, .. } => {
                info!("Shutdown requested: {}", reason);
            }
            _ => debug!("Event: {}", event.description()),
        }

        self.sender
            .send(event)
            .map_err(|e| EventBusError::PublishFailed {
                details: e.to_string(),
            })
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Check if there are any active subscribers
    pub fn has_subscribers(&self) -> bool {
        self.sender.receiver_count() > 0
    }
}

/// Event filter for selective event handling: accepts the listed event types
#[derive(Debug, Clone)]
pub struct EventFilter {
    event_types: Vec<&'static str>,
}

impl EventFilter {
    pub fn event_types(event_types: Vec<&'static str>) -> Self {
        Self { event_types }
    }

    /// Check if an event passes this filter
    pub fn matches(&self, event: &BeaconEvent) -> bool {
        self.event_types.contains(&event.event_type())
    }
}

/// Event receiver with filtering
pub struct EventReceiver {
    receiver: broadcast::Receiver<BeaconEvent>,
    filter: EventFilter,
    name: String,
}

impl EventReceiver {
    pub fn new(
        receiver: broadcast::Receiver<BeaconEvent>,
        filter: EventFilter,
        name: String,
    ) -> Self {
        Self {
            receiver,
            filter,
            name,
        }
    }

    /// Receive the next event passing the filter
    ///
    /// A lagged receiver skips what it missed and keeps going.
    pub async fn recv(&mut self) -> Result<BeaconEvent, EventBusError> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    if self.filter.matches(&event) {
                        debug!(
                            "Receiver '{}' received event: {}",
                            self.name,
                            event.description()
                        );
                        return Ok(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Receiver '{}' lagged behind by {} events", self.name, n);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Event bus closed for receiver '{}'", self.name);
                    return Err(EventBusError::ChannelClosed);
                }
            }
        }
    }

    /// Try to receive an event without blocking
    pub fn try_recv(&mut self) -> Result<Option<BeaconEvent>, EventBusError> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.filter.matches(&event) {
                        return Ok(Some(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => {
                    return Ok(None);
                }
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    warn!("Receiver '{}' lagged behind by {} events", self.name, n);
                }
                Err(broadcast::error::TryRecvError::Closed) => {
                    return Err(EventBusError::ChannelClosed);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{timeout, Duration};

    #[tokio::test]
    async fn test_event_bus_basic_operations() {
        let event_bus = EventBus::new(10);
        let mut receiver = event_bus.subscribe();

        let subscriber_count = event_bus
            .publish(BeaconEvent::SessionRolled {
                session_id: "20240601-1".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(subscriber_count, 1);

        match receiver.recv().await.unwrap() {
            BeaconEvent::SessionRolled { session_id } => assert_eq!(session_id, "20240601-1"),
            other => panic!("Unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_fails() {
        let event_bus = EventBus::new(10);
        assert!(!event_bus.has_subscribers());
        assert!(event_bus
            .publish(BeaconEvent::ScanStopped {
                producer: "replay".to_string()
            })
            .await
            .is_err());
    }

    #[test]
    fn test_event_filter() {
        let filter = EventFilter::event_types(vec!["watchdog_resync", "storage_demoted"]);

        assert!(filter.matches(&BeaconEvent::WatchdogResync { silent_seconds: 61 }));
        assert!(!filter.matches(&BeaconEvent::WatchdogResubscribe { silent_seconds: 21 }));
        assert!(filter.matches(&BeaconEvent::StorageDemoted {
            from: "sqlite".to_string(),
            to: "memory".to_string(),
            reason: "disk full".to_string(),
        }));
        assert!(!filter.matches(&BeaconEvent::shutdown("test")));
    }

    #[tokio::test]
    async fn test_filtered_receiver_skips_other_events() {
        let event_bus = EventBus::new(10);
        let mut receiver = event_bus.subscribe_filtered(
            EventFilter::event_types(vec!["shutdown_requested"]),
            "shutdown-watcher",
        );

        event_bus
            .publish(BeaconEvent::ResyncRequested {
                reason: "keyboard".to_string(),
            })
            .await
            .unwrap();
        event_bus
            .publish(BeaconEvent::shutdown("keyboard"))
            .await
            .unwrap();

        let event = timeout(Duration::from_millis(100), receiver.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.event_type(), "shutdown_requested");
        assert!(receiver.try_recv().unwrap().is_none());
    }
}
