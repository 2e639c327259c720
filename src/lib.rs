//! Proximity beacon advertisement logger.
//!
//! Advertisements flow from a [`scanner::ScanProducer`] through the
//! [`ingest::IngestPipeline`] (decode, estimate distance, classify, assign a
//! session) into a [`storage::RecordStore`] that falls back across SQLite, a
//! key-value directory and memory. [`cluster`], [`filters`] and [`export`]
//! operate on stored records.

pub mod app;
pub mod clock;
pub mod cluster;
pub mod config;
pub mod decoder;
pub mod device;
pub mod distance;
pub mod error;
pub mod events;
pub mod export;
pub mod filters;
pub mod ingest;
pub mod keyboard_input;
pub mod profiler;
pub mod record;
pub mod scanner;
pub mod session;
pub mod storage;
pub mod watchdog;

pub use app::{ComponentState, ScanOrchestrator, ShutdownReason};
pub use clock::{Clock, ManualClock, SystemClock};
pub use cluster::{Clusterable, Clusterer};
pub use config::BeaconConfig;
pub use device::DeviceKey;
pub use error::{BeaconError, Result, ScannerError, StorageError};
pub use events::{BeaconEvent, EventBus, EventFilter, EventReceiver};
pub use export::{ExportFormat, ExportRow};
pub use filters::RecordFilter;
pub use ingest::{IngestPipeline, IngestStats, Liveness};
pub use record::{AdvertisementEvent, AdvertisementRecord, BeaconFields, BeaconType, ClusteredRecord, GeoFix};
pub use scanner::{MockScanner, ReplayScanner, ScanController, ScanProducer};
pub use session::{SessionManager, SessionZone};
pub use storage::{RecordStore, StorageTier};
pub use watchdog::{Watchdog, WatchdogAction};
