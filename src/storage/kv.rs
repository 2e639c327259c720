use super::{RecordBackend, StorageTier};
use crate::error::StorageError;
use crate::record::AdvertisementRecord;
use parking_lot::Mutex;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Key under which the whole record collection is stored
pub const RECORDS_KEY: &str = "beacontrail-records";

/// Minimal synchronous string key-value store
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// One file per key inside a directory
pub struct FileKvStore {
    dir: PathBuf,
}

impl FileKvStore {
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self, StorageError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|e| StorageError::Open {
            tier: StorageTier::KeyValue.to_string(),
            details: format!("{}: {}", dir.display(), e),
        })?;

        Ok(Self { dir })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }
}

impl KeyValueStore for FileKvStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        // Write-then-rename so a crash never leaves a half-written blob behind
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(value.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Fallback tier: the whole collection as one JSON array under [`RECORDS_KEY`]
///
/// Every append rewrites the entire blob. Only used in degraded mode.
pub struct KvBackend {
    store: Box<dyn KeyValueStore>,
    write_lock: Mutex<()>,
}

impl KvBackend {
    pub fn new(store: Box<dyn KeyValueStore>) -> Self {
        Self {
            store,
            write_lock: Mutex::new(()),
        }
    }

    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self, StorageError> {
        Ok(Self::new(Box::new(FileKvStore::open(dir)?)))
    }

    fn read_blob(&self) -> Result<Vec<AdvertisementRecord>, StorageError> {
        match self.store.get(RECORDS_KEY)? {
            Some(blob) if !blob.trim().is_empty() => {
                serde_json::from_str(&blob).map_err(|e| StorageError::Corrupt {
                    details: format!("{}: {}", RECORDS_KEY, e),
                })
            }
            _ => Ok(Vec::new()),
        }
    }
}

impl RecordBackend for KvBackend {
    fn tier(&self) -> StorageTier {
        StorageTier::KeyValue
    }

    fn append(&self, records: &[AdvertisementRecord]) -> Result<(), StorageError> {
        if records.is_empty() {
            return Ok(());
        }

        let _guard = self.write_lock.lock();
        let mut all = self.read_blob()?;
        all.extend_from_slice(records);

        let blob = serde_json::to_string(&all)?;
        self.store.set(RECORDS_KEY, &blob)?;
        debug!("Rewrote {} records under {}", all.len(), RECORDS_KEY);

        Ok(())
    }

    fn load_all(&self) -> Result<Vec<AdvertisementRecord>, StorageError> {
        self.read_blob()
    }

    fn clear(&self) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock();
        self.store.remove(RECORDS_KEY)
    }
}
