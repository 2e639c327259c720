use super::{RecordBackend, StorageTier};
use crate::error::StorageError;
use crate::record::{format_timestamp, AdvertisementRecord};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use std::path::Path;
use tracing::{debug, warn};

/// Primary tier: embedded SQLite database
///
/// Records are kept as JSON payloads keyed by an auto-incrementing id, with the
/// timestamp duplicated into an indexed column for range counts. Timestamps are
/// stored in the fixed-width `YYYY-MM-DDTHH:MM:SS.mmmZ` form, so string order is
/// time order.
pub struct SqliteBackend {
    conn: Mutex<Connection>,
}

impl SqliteBackend {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let path = path.as_ref();
        debug!("Opening record database at {}", path.display());

        let conn = Connection::open(path).map_err(|e| StorageError::Open {
            tier: StorageTier::Sqlite.to_string(),
            details: format!("{}: {}", path.display(), e),
        })?;

        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=NORMAL;",
        )?;

        let backend = Self {
            conn: Mutex::new(conn),
        };
        backend.init_schema()?;
        Ok(backend)
    }

    pub fn in_memory() -> Result<Self, StorageError> {
        let backend = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        backend.init_schema()?;
        Ok(backend)
    }

    fn init_schema(&self) -> Result<(), StorageError> {
        let conn = self.conn.lock();

        conn.execute(
            "CREATE TABLE IF NOT EXISTS records (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                payload TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_records_timestamp ON records(timestamp)",
            [],
        )?;

        Ok(())
    }
}

impl RecordBackend for SqliteBackend {
    fn tier(&self) -> StorageTier {
        StorageTier::Sqlite
    }

    fn append(&self, records: &[AdvertisementRecord]) -> Result<(), StorageError> {
        if records.is_empty() {
            return Ok(());
        }

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt =
                tx.prepare_cached("INSERT INTO records (timestamp, payload) VALUES (?1, ?2)")?;
            for record in records {
                let payload = serde_json::to_string(record)?;
                stmt.execute(params![format_timestamp(&record.timestamp), payload])?;
            }
        }
        tx.commit()?;

        Ok(())
    }

    fn load_all(&self) -> Result<Vec<AdvertisementRecord>, StorageError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT id, payload FROM records ORDER BY id")?;

        let rows = stmt.query_map([], |row| {
            let id: i64 = row.get(0)?;
            let payload: String = row.get(1)?;
            Ok((id, payload))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (id, payload) = row?;
            match serde_json::from_str(&payload) {
                Ok(record) => records.push(record),
                Err(e) => warn!("Skipping unreadable record {}: {}", id, e),
            }
        }

        Ok(records)
    }

    fn count_since(&self, cutoff: DateTime<Utc>) -> Result<usize, StorageError> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM records WHERE timestamp >= ?1",
            params![format_timestamp(&cutoff)],
            |row| row.get(0),
        )?;

        Ok(count.max(0) as usize)
    }

    fn clear(&self) -> Result<(), StorageError> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM records", [])?;
        Ok(())
    }
}
