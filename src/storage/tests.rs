use super::*;
use crate::events::BeaconEvent;
use chrono::TimeZone;
use std::io;
use tempfile::TempDir;

fn record_at(name: &str, timestamp: DateTime<Utc>) -> AdvertisementRecord {
    let mut record = AdvertisementRecord::at(timestamp);
    record.device_name = Some(name.to_string());
    record.rssi = Some(-60);
    record.session_id = "20240601-1".to_string();
    record
}

fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
}

fn names(records: &[AdvertisementRecord]) -> Vec<String> {
    records
        .iter()
        .filter_map(|r| r.device_name.clone())
        .collect()
}

fn test_config(dir: &TempDir) -> StorageConfig {
    StorageConfig {
        database_path: dir.path().join("records.db").to_string_lossy().into_owned(),
        kv_dir: dir.path().join("kv").to_string_lossy().into_owned(),
        batch_writes: false,
        flush_delay_ms: 20,
        allow_memory_fallback: true,
    }
}

/// Key-value store whose writes always fail
struct FailingKv;

impl KeyValueStore for FailingKv {
    fn get(&self, _key: &str) -> Result<Option<String>, StorageError> {
        Ok(None)
    }

    fn set(&self, _key: &str, _value: &str) -> Result<(), StorageError> {
        Err(io::Error::new(io::ErrorKind::Other, "quota exceeded").into())
    }

    fn remove(&self, _key: &str) -> Result<(), StorageError> {
        Ok(())
    }
}

#[test]
fn test_sqlite_backend_round_trip() {
    let backend = SqliteBackend::in_memory().unwrap();
    let records = vec![
        record_at("first", base_time()),
        record_at("second", base_time() + ChronoDuration::seconds(1)),
    ];

    backend.append(&records).unwrap();
    backend
        .append(&[record_at("third", base_time() + ChronoDuration::seconds(2))])
        .unwrap();

    let loaded = backend.load_all().unwrap();
    assert_eq!(names(&loaded), vec!["first", "second", "third"]);
    assert_eq!(loaded[0], records[0]);

    let cutoff = base_time() + ChronoDuration::seconds(1);
    assert_eq!(backend.count_since(cutoff).unwrap(), 2);

    backend.clear().unwrap();
    assert!(backend.load_all().unwrap().is_empty());
}

#[test]
fn test_sqlite_backend_persists_across_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("records.db");

    {
        let backend = SqliteBackend::open(&path).unwrap();
        backend.append(&[record_at("kept", base_time())]).unwrap();
    }

    let reopened = SqliteBackend::open(&path).unwrap();
    assert_eq!(names(&reopened.load_all().unwrap()), vec!["kept"]);
}

#[test]
fn test_kv_backend_rewrites_whole_blob() {
    let dir = TempDir::new().unwrap();
    let backend = KvBackend::open(dir.path()).unwrap();

    backend.append(&[record_at("a", base_time())]).unwrap();
    backend.append(&[record_at("b", base_time())]).unwrap();
    assert_eq!(names(&backend.load_all().unwrap()), vec!["a", "b"]);

    let blob = std::fs::read_to_string(dir.path().join(format!("{}.json", RECORDS_KEY))).unwrap();
    let stored: Vec<AdvertisementRecord> = serde_json::from_str(&blob).unwrap();
    assert_eq!(stored.len(), 2);

    backend.clear().unwrap();
    assert!(backend.load_all().unwrap().is_empty());
}

#[test]
fn test_kv_backend_reports_corrupt_blob() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join(format!("{}.json", RECORDS_KEY)), "[{not json").unwrap();

    let backend = KvBackend::open(dir.path()).unwrap();
    assert!(matches!(
        backend.load_all(),
        Err(StorageError::Corrupt { .. })
    ));
}

#[tokio::test]
async fn test_open_prefers_sqlite() {
    let dir = TempDir::new().unwrap();
    let store = RecordStore::open(&test_config(&dir), None).unwrap();
    assert_eq!(store.active_tier(), StorageTier::Sqlite);
}

#[tokio::test]
async fn test_sqlite_failure_at_open_demotes_to_key_value() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(&dir);
    // SQLite does not create missing parent directories
    config.database_path = dir
        .path()
        .join("missing")
        .join("nested")
        .join("records.db")
        .to_string_lossy()
        .into_owned();

    let store = RecordStore::open(&config, None).unwrap();
    assert_eq!(store.active_tier(), StorageTier::KeyValue);

    store.put(record_at("one", base_time())).await.unwrap();
    store
        .put(record_at("two", base_time() + ChronoDuration::seconds(1)))
        .await
        .unwrap();

    let records = store.get_all().await.unwrap();
    assert_eq!(names(&records), vec!["one", "two"]);
}

#[tokio::test]
async fn test_write_failure_demotes_once_and_keeps_record() {
    let bus = Arc::new(EventBus::new(16));
    let mut events = bus.subscribe();

    let tiers: Vec<Arc<dyn RecordBackend>> = vec![
        Arc::new(KvBackend::new(Box::new(FailingKv))),
        Arc::new(MemoryBackend::new()),
    ];
    let storage = TieredStorage::new(tiers).unwrap().with_event_bus(bus.clone());
    let store = RecordStore::new(storage, None, Some(bus.clone()));
    assert_eq!(store.active_tier(), StorageTier::KeyValue);

    store.put(record_at("before", base_time())).await.unwrap();
    assert_eq!(store.active_tier(), StorageTier::Memory);
    store.put(record_at("after", base_time())).await.unwrap();

    let records = store.get_all().await.unwrap();
    assert_eq!(names(&records), vec!["before", "after"]);

    match events.recv().await.unwrap() {
        BeaconEvent::StorageDemoted { from, to, .. } => {
            assert_eq!(from, "key-value");
            assert_eq!(to, "memory");
        }
        other => panic!("Unexpected event: {:?}", other),
    }
    // Demotion happened once
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn test_last_tier_failure_surfaces_error() {
    let tiers: Vec<Arc<dyn RecordBackend>> = vec![Arc::new(KvBackend::new(Box::new(FailingKv)))];
    let store = RecordStore::new(TieredStorage::new(tiers).unwrap(), None, None);

    assert!(store.put(record_at("lost", base_time())).await.is_err());
    assert_eq!(store.active_tier(), StorageTier::KeyValue);
}

#[tokio::test]
async fn test_no_tier_available() {
    let dir = TempDir::new().unwrap();
    let blocker = dir.path().join("blocker");
    std::fs::write(&blocker, b"not a directory").unwrap();

    let config = StorageConfig {
        database_path: blocker.join("records.db").to_string_lossy().into_owned(),
        kv_dir: blocker.join("kv").to_string_lossy().into_owned(),
        batch_writes: true,
        flush_delay_ms: 250,
        allow_memory_fallback: false,
    };

    assert!(matches!(
        RecordStore::open(&config, None),
        Err(StorageError::NoTierAvailable)
    ));

    assert!(matches!(
        TieredStorage::new(Vec::new()),
        Err(StorageError::NoTierAvailable)
    ));
}

#[tokio::test]
async fn test_batched_writes_flush_after_delay() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(&dir);
    config.batch_writes = true;
    config.flush_delay_ms = 20;

    let store = RecordStore::open(&config, None).unwrap();
    for name in ["a", "b", "c"] {
        store.put(record_at(name, base_time())).await.unwrap();
    }
    assert_eq!(store.stats().pending_records, 3);

    tokio::time::sleep(Duration::from_millis(300)).await;
    let stats = store.stats();
    assert_eq!(stats.pending_records, 0);
    assert_eq!(stats.flushed_records, 3);

    store.put(record_at("d", base_time())).await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(store.stats().flushed_records, 4);

    let records = store.get_all().await.unwrap();
    assert_eq!(names(&records), vec!["a", "b", "c", "d"]);
}

#[tokio::test]
async fn test_reads_include_queued_records() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(&dir);
    config.batch_writes = true;
    config.flush_delay_ms = 60_000;

    let store = RecordStore::open(&config, None).unwrap();
    store.put(record_at("queued", base_time())).await.unwrap();

    let records = store.get_all().await.unwrap();
    assert_eq!(names(&records), vec!["queued"]);
    assert_eq!(store.stats().pending_records, 0);
}

#[tokio::test]
async fn test_count_since_and_clear() {
    let dir = TempDir::new().unwrap();
    let store = RecordStore::open(&test_config(&dir), None).unwrap();
    let now = base_time();

    store
        .put(record_at("old", now - ChronoDuration::seconds(100)))
        .await
        .unwrap();
    store
        .put(record_at("recent", now - ChronoDuration::seconds(10)))
        .await
        .unwrap();
    store.put(record_at("now", now)).await.unwrap();

    assert_eq!(store.count_since(30, now).await.unwrap(), 2);
    assert_eq!(store.count_since(100, now).await.unwrap(), 3);
    assert_eq!(store.count_since(0, now).await.unwrap(), 1);

    store.clear().await.unwrap();
    assert!(store.get_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_count_since_agrees_across_tiers_at_sub_millisecond_cutoff() {
    let dir = TempDir::new().unwrap();
    let sqlite = RecordStore::open(&test_config(&dir), None).unwrap();
    let tiers: Vec<Arc<dyn RecordBackend>> = vec![Arc::new(MemoryBackend::new())];
    let memory = RecordStore::new(TieredStorage::new(tiers).unwrap(), None, None);

    let now = base_time() + ChronoDuration::microseconds(700);
    let edge = record_at(
        "edge",
        base_time() - ChronoDuration::seconds(30) + ChronoDuration::microseconds(300),
    );

    sqlite.put(edge.clone()).await.unwrap();
    memory.put(edge).await.unwrap();

    assert_eq!(sqlite.active_tier(), StorageTier::Sqlite);
    assert_eq!(sqlite.count_since(30, now).await.unwrap(), 1);
    assert_eq!(memory.count_since(30, now).await.unwrap(), 1);
}
