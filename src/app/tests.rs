use super::*;
use crate::config::BeaconConfig;
use crate::error::{BeaconError, ScannerError};
use crate::events::BeaconEvent;
use crate::record::AdvertisementEvent;
use crate::scanner::{MockScanner, ScanProducer};
use crate::storage::StorageTier;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn create_test_config(dir: &TempDir) -> BeaconConfig {
    let mut config = BeaconConfig::default();
    config.storage.database_path = dir.path().join("records.db").to_string_lossy().into_owned();
    config.storage.kv_dir = dir.path().join("kv").to_string_lossy().into_owned();
    config.storage.flush_delay_ms = 20;
    config.watchdog.resync_delay_ms = 1;
    config.system.stats_report_seconds = 0;
    config
}

fn scripted_scanner() -> Arc<MockScanner> {
    Arc::new(MockScanner::with_script(vec![
        AdvertisementEvent::named("JBL Flip 5").with_rssi(-60.0),
        AdvertisementEvent::named("Garmin Venu").with_rssi(-72.0),
    ]))
}

async fn wait_until<F: Fn() -> bool>(condition: F) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

async fn started(dir: &TempDir, producer: Arc<MockScanner>) -> ScanOrchestrator {
    let mut orchestrator = ScanOrchestrator::new(create_test_config(dir))
        .unwrap()
        .with_producer(producer);
    orchestrator.initialize().await.unwrap();
    orchestrator.start().await.unwrap();
    orchestrator
}

#[tokio::test]
async fn test_initialize_opens_storage() {
    let dir = TempDir::new().unwrap();
    let mut orchestrator = ScanOrchestrator::new(create_test_config(&dir)).unwrap();

    assert!(orchestrator.get_all_component_states().await.is_empty());
    orchestrator.initialize().await.unwrap();

    let states = orchestrator.get_all_component_states().await;
    assert_eq!(states.get("storage"), Some(&ComponentState::Running));
    assert_eq!(states.get("scanner"), Some(&ComponentState::Stopped));
    assert_eq!(states.get("watchdog"), Some(&ComponentState::Stopped));
    assert!(!states.contains_key("keyboard"));

    assert_eq!(
        orchestrator.store().unwrap().active_tier(),
        StorageTier::Sqlite
    );
}

#[tokio::test]
async fn test_initialize_fails_without_any_tier() {
    let dir = TempDir::new().unwrap();
    let blocker = dir.path().join("file");
    std::fs::write(&blocker, b"not a directory").unwrap();

    let mut config = create_test_config(&dir);
    config.storage.database_path = blocker.join("records.db").to_string_lossy().into_owned();
    config.storage.kv_dir = blocker.join("kv").to_string_lossy().into_owned();
    config.storage.allow_memory_fallback = false;

    let mut orchestrator = ScanOrchestrator::new(config).unwrap();
    let result = orchestrator.initialize().await;

    assert!(matches!(
        result,
        Err(BeaconError::Storage(crate::error::StorageError::NoTierAvailable))
    ));
    assert_eq!(
        orchestrator.get_component_state("storage").await,
        Some(ComponentState::Failed)
    );
}

#[tokio::test]
async fn test_start_without_producer_is_explicit() {
    let dir = TempDir::new().unwrap();
    let mut orchestrator = ScanOrchestrator::new(create_test_config(&dir)).unwrap();
    orchestrator.initialize().await.unwrap();

    match orchestrator.start().await {
        Err(BeaconError::Scanner(ScannerError::NotAvailable { details })) => {
            assert!(details.contains("replay"));
        }
        other => panic!("Unexpected start result: {:?}", other.map(|_| ())),
    }
    assert_eq!(
        orchestrator.get_component_state("scanner").await,
        Some(ComponentState::Failed)
    );
}

#[tokio::test]
async fn test_start_failure_surfaces_cause() {
    let dir = TempDir::new().unwrap();
    let producer = Arc::new(MockScanner::new());
    producer.fail_start(true);

    let mut orchestrator = ScanOrchestrator::new(create_test_config(&dir))
        .unwrap()
        .with_producer(producer);
    orchestrator.initialize().await.unwrap();

    let err = orchestrator.start().await.unwrap_err();
    assert!(err.to_string().contains("scripted start failure"));
    assert!(err.is_recoverable());
}

#[tokio::test]
async fn test_start_rejects_uninitialized() {
    let dir = TempDir::new().unwrap();
    let mut orchestrator = ScanOrchestrator::new(create_test_config(&dir))
        .unwrap()
        .with_producer(scripted_scanner());

    assert!(matches!(
        orchestrator.start().await,
        Err(BeaconError::System { .. })
    ));
}

#[tokio::test]
async fn test_advertisements_reach_storage_and_survive_shutdown() {
    let dir = TempDir::new().unwrap();
    let producer = scripted_scanner();
    let mut orchestrator = started(&dir, producer.clone()).await;

    let pipeline = orchestrator.pipeline().unwrap();
    wait_until(|| pipeline.stats().snapshot().packets == 2).await;

    // Delivered right before shutdown: still drained and flushed
    assert!(producer.emit(AdvertisementEvent::named("Tile")).await);

    let exit_code = orchestrator.shutdown().await.unwrap();
    assert_eq!(exit_code, 0);
    assert_eq!(producer.stop_count(), 1);
    assert!(!producer.is_active());

    let store = orchestrator.store().unwrap();
    assert_eq!(store.stats().pending_records, 0);
    let records = store.get_all().await.unwrap();
    assert_eq!(records.len(), 3);

    let jbl = records
        .iter()
        .find(|r| r.device_name.as_deref() == Some("JBL Flip 5"))
        .unwrap();
    assert_eq!(jbl.vendor, "JBL");
    assert!(jbl.distance_m.is_some());

    let states = orchestrator.get_all_component_states().await;
    for component in ["monitor", "watchdog", "scanner", "ingest", "storage"] {
        assert_eq!(states.get(component), Some(&ComponentState::Stopped), "{}", component);
    }
}

#[tokio::test]
async fn test_records_persist_across_restarts() {
    let dir = TempDir::new().unwrap();

    let mut first = started(&dir, scripted_scanner()).await;
    let pipeline = first.pipeline().unwrap();
    wait_until(|| pipeline.stats().snapshot().packets == 2).await;
    first.shutdown().await.unwrap();

    let mut second = ScanOrchestrator::new(create_test_config(&dir)).unwrap();
    second.initialize().await.unwrap();
    assert_eq!(second.store().unwrap().get_all().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_manual_resync_restarts_scanning() {
    let dir = TempDir::new().unwrap();
    let producer = Arc::new(MockScanner::new());
    let mut orchestrator = started(&dir, producer.clone()).await;
    assert_eq!(producer.start_count(), 1);

    let mut events = orchestrator.event_bus().subscribe();
    orchestrator
        .event_bus()
        .publish(BeaconEvent::ResyncRequested {
            reason: "test".to_string(),
        })
        .await
        .unwrap();

    wait_until(|| producer.start_count() == 2).await;
    assert_eq!(producer.stop_count(), 1);

    let resynced = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Ok(BeaconEvent::WatchdogResync { .. }) = events.recv().await {
                break;
            }
        }
    })
    .await;
    assert!(resynced.is_ok());

    orchestrator.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_request_event_ends_run() {
    let dir = TempDir::new().unwrap();
    let mut orchestrator = started(&dir, scripted_scanner()).await;
    let bus = orchestrator.event_bus();

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        let _ = bus.publish(BeaconEvent::shutdown("test")).await;
    });

    let exit_code = tokio::time::timeout(Duration::from_secs(10), orchestrator.run())
        .await
        .expect("run did not return")
        .unwrap();
    assert_eq!(exit_code, 0);
    assert_eq!(
        orchestrator.get_component_state("scanner").await,
        Some(ComponentState::Stopped)
    );
}

#[tokio::test]
async fn test_only_first_shutdown_request_counts() {
    let dir = TempDir::new().unwrap();
    let mut orchestrator = ScanOrchestrator::new(create_test_config(&dir)).unwrap();

    assert!(orchestrator.request_shutdown(ShutdownReason::HealthCheck).await);
    assert!(!orchestrator.request_shutdown(ShutdownReason::UserRequest).await);

    // run() sees the first reason and shuts down what was never started
    assert_eq!(orchestrator.run().await.unwrap(), 0);
    assert!(orchestrator.run().await.is_err());
}

#[tokio::test]
async fn test_concurrent_component_state_access() {
    let dir = TempDir::new().unwrap();
    let orchestrator = Arc::new(ScanOrchestrator::new(create_test_config(&dir)).unwrap());

    let mut handles = Vec::new();
    for i in 0..10 {
        let orchestrator = Arc::clone(&orchestrator);
        handles.push(tokio::spawn(async move {
            let name = format!("component_{}", i);
            orchestrator
                .set_component_state(&name, ComponentState::Running)
                .await;
            orchestrator.get_component_state(&name).await
        }));
    }

    for handle in handles {
        assert_eq!(handle.await.unwrap(), Some(ComponentState::Running));
    }
    assert_eq!(orchestrator.get_all_component_states().await.len(), 10);
}

#[test]
fn test_shutdown_reason_debug_formatting() {
    let reasons = vec![
        ShutdownReason::Signal("SIGTERM".to_string()),
        ShutdownReason::Error("Test error".to_string()),
        ShutdownReason::UserRequest,
        ShutdownReason::HealthCheck,
    ];

    for reason in reasons {
        let debug_str = format!("{:?}", reason);
        match reason {
            ShutdownReason::Signal(ref sig) => assert!(debug_str.contains(sig)),
            ShutdownReason::Error(ref msg) => assert!(debug_str.contains(msg)),
            ShutdownReason::UserRequest => assert!(debug_str.contains("UserRequest")),
            ShutdownReason::HealthCheck => assert!(debug_str.contains("HealthCheck")),
        }
    }
}
