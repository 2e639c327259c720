use super::{RecordBackend, StorageTier};
use crate::error::StorageError;
use crate::record::AdvertisementRecord;
use parking_lot::Mutex;

/// Last-resort tier: an in-process list, lost on exit
#[derive(Default)]
pub struct MemoryBackend {
    records: Mutex<Vec<AdvertisementRecord>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecordBackend for MemoryBackend {
    fn tier(&self) -> StorageTier {
        StorageTier::Memory
    }

    fn append(&self, records: &[AdvertisementRecord]) -> Result<(), StorageError> {
        self.records.lock().extend_from_slice(records);
        Ok(())
    }

    fn load_all(&self) -> Result<Vec<AdvertisementRecord>, StorageError> {
        Ok(self.records.lock().clone())
    }

    fn clear(&self) -> Result<(), StorageError> {
        self.records.lock().clear();
        Ok(())
    }
}
