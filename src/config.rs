use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct BeaconConfig {
    pub scanner: ScannerConfig,
    pub session: SessionConfig,
    pub distance: DistanceConfig,
    pub cluster: ClusterConfig,
    pub storage: StorageConfig,
    pub watchdog: WatchdogConfig,
    pub system: SystemConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ScannerConfig {
    /// JSON-lines advertisement capture to replay (no live radio in this build)
    pub replay_path: Option<String>,

    /// Delay between replayed advertisements in milliseconds
    #[serde(default = "default_replay_interval_ms")]
    pub replay_interval_ms: u64,

    /// Start over at the top of the capture when it is exhausted
    #[serde(default = "default_replay_loop")]
    pub replay_loop: bool,

    /// Capacity of the advertisement channel feeding the ingest pipeline
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SessionConfig {
    /// Gap without events after which a new session is minted
    #[serde(default = "default_inactivity_seconds")]
    pub inactivity_seconds: u64,

    /// IANA timezone used for the session date prefix (host local time if unset)
    pub timezone: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DistanceConfig {
    /// Path-loss exponent, 2.0 for free space, up to 4.0 indoors
    #[serde(default = "default_path_loss_exponent")]
    pub path_loss_exponent: f64,

    /// Expected RSSI at one metre when the advertisement carries no tx power
    #[serde(default = "default_reference_power_dbm")]
    pub reference_power_dbm: i32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ClusterConfig {
    /// Width of the wall-clock aligned clustering window
    #[serde(default = "default_window_seconds")]
    pub window_seconds: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StorageConfig {
    /// SQLite database file for the primary tier
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Directory backing the key-value fallback tier
    #[serde(default = "default_kv_dir")]
    pub kv_dir: String,

    /// Queue records and commit them in debounced batches
    #[serde(default = "default_batch_writes")]
    pub batch_writes: bool,

    /// Debounce delay before a queued batch is committed
    #[serde(default = "default_flush_delay_ms")]
    pub flush_delay_ms: u64,

    /// Keep running on an in-memory list when no durable tier opens
    #[serde(default = "default_allow_memory_fallback")]
    pub allow_memory_fallback: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WatchdogConfig {
    #[serde(default = "default_watchdog_enabled")]
    pub enabled: bool,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// High advertisement rate mode, uses the shorter soft threshold
    #[serde(default = "default_fast_mode")]
    pub fast_mode: bool,

    #[serde(default = "default_soft_threshold_seconds")]
    pub soft_threshold_seconds: u64,

    #[serde(default = "default_fast_soft_threshold_seconds")]
    pub fast_soft_threshold_seconds: u64,

    #[serde(default = "default_hard_threshold_seconds")]
    pub hard_threshold_seconds: u64,

    /// Pause between stop and start during a full resync
    #[serde(default = "default_resync_delay_ms")]
    pub resync_delay_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SystemConfig {
    /// Event bus capacity
    #[serde(default = "default_event_bus_capacity")]
    pub event_bus_capacity: usize,

    /// Interval between status reports in the log
    #[serde(default = "default_stats_report_seconds")]
    pub stats_report_seconds: u64,
}

impl BeaconConfig {
    /// Load configuration from default sources (file + environment variables)
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_file("beacontrail.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            .set_default("scanner.replay_interval_ms", default_replay_interval_ms())?
            .set_default("scanner.replay_loop", default_replay_loop())?
            .set_default(
                "scanner.channel_capacity",
                default_channel_capacity() as i64,
            )?
            .set_default("session.inactivity_seconds", default_inactivity_seconds())?
            .set_default("distance.path_loss_exponent", default_path_loss_exponent())?
            .set_default(
                "distance.reference_power_dbm",
                default_reference_power_dbm() as i64,
            )?
            .set_default("cluster.window_seconds", default_window_seconds())?
            .set_default("storage.database_path", default_database_path())?
            .set_default("storage.kv_dir", default_kv_dir())?
            .set_default("storage.batch_writes", default_batch_writes())?
            .set_default("storage.flush_delay_ms", default_flush_delay_ms())?
            .set_default(
                "storage.allow_memory_fallback",
                default_allow_memory_fallback(),
            )?
            .set_default("watchdog.enabled", default_watchdog_enabled())?
            .set_default("watchdog.poll_interval_ms", default_poll_interval_ms())?
            .set_default("watchdog.fast_mode", default_fast_mode())?
            .set_default(
                "watchdog.soft_threshold_seconds",
                default_soft_threshold_seconds(),
            )?
            .set_default(
                "watchdog.fast_soft_threshold_seconds",
                default_fast_soft_threshold_seconds(),
            )?
            .set_default(
                "watchdog.hard_threshold_seconds",
                default_hard_threshold_seconds(),
            )?
            .set_default("watchdog.resync_delay_ms", default_resync_delay_ms())?
            .set_default(
                "system.event_bus_capacity",
                default_event_bus_capacity() as i64,
            )?
            .set_default(
                "system.stats_report_seconds",
                default_stats_report_seconds(),
            )?
            .add_source(File::with_name(&path_str).required(false))
            // BEACONTRAIL_<SECTION>__<KEY>, e.g. BEACONTRAIL_CLUSTER__WINDOW_SECONDS
            .add_source(
                Environment::with_prefix("BEACONTRAIL")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: BeaconConfig = settings.try_deserialize()?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scanner.channel_capacity == 0 {
            return Err(ConfigError::Message(
                "Scanner channel_capacity must be greater than 0".to_string(),
            ));
        }

        if self.session.inactivity_seconds == 0 {
            return Err(ConfigError::Message(
                "Session inactivity_seconds must be greater than 0".to_string(),
            ));
        }

        if let Some(tz) = &self.session.timezone {
            if tz.parse::<chrono_tz::Tz>().is_err() {
                return Err(ConfigError::Message(format!(
                    "Unknown session timezone: {}",
                    tz
                )));
            }
        }

        let exponent = self.distance.path_loss_exponent;
        if !exponent.is_finite() || !(1.0..=4.0).contains(&exponent) {
            return Err(ConfigError::Message(
                "Distance path_loss_exponent must be within [1.0, 4.0]".to_string(),
            ));
        }

        if self.cluster.window_seconds == 0 {
            return Err(ConfigError::Message(
                "Cluster window_seconds must be greater than 0".to_string(),
            ));
        }

        if self.watchdog.poll_interval_ms == 0 {
            return Err(ConfigError::Message(
                "Watchdog poll_interval_ms must be greater than 0".to_string(),
            ));
        }

        if self.watchdog.soft_threshold_seconds == 0 || self.watchdog.fast_soft_threshold_seconds == 0
        {
            return Err(ConfigError::Message(
                "Watchdog soft thresholds must be greater than 0".to_string(),
            ));
        }

        let longest_soft = self
            .watchdog
            .soft_threshold_seconds
            .max(self.watchdog.fast_soft_threshold_seconds);
        if self.watchdog.hard_threshold_seconds <= longest_soft {
            return Err(ConfigError::Message(
                "Watchdog hard_threshold_seconds must exceed both soft thresholds".to_string(),
            ));
        }

        if self.system.event_bus_capacity == 0 {
            return Err(ConfigError::Message(
                "Event bus capacity must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for BeaconConfig {
    fn default() -> Self {
        Self {
            scanner: ScannerConfig {
                replay_path: None,
                replay_interval_ms: default_replay_interval_ms(),
                replay_loop: default_replay_loop(),
                channel_capacity: default_channel_capacity(),
            },
            session: SessionConfig {
                inactivity_seconds: default_inactivity_seconds(),
                timezone: None,
            },
            distance: DistanceConfig {
                path_loss_exponent: default_path_loss_exponent(),
                reference_power_dbm: default_reference_power_dbm(),
            },
            cluster: ClusterConfig {
                window_seconds: default_window_seconds(),
            },
            storage: StorageConfig {
                database_path: default_database_path(),
                kv_dir: default_kv_dir(),
                batch_writes: default_batch_writes(),
                flush_delay_ms: default_flush_delay_ms(),
                allow_memory_fallback: default_allow_memory_fallback(),
            },
            watchdog: WatchdogConfig {
                enabled: default_watchdog_enabled(),
                poll_interval_ms: default_poll_interval_ms(),
                fast_mode: default_fast_mode(),
                soft_threshold_seconds: default_soft_threshold_seconds(),
                fast_soft_threshold_seconds: default_fast_soft_threshold_seconds(),
                hard_threshold_seconds: default_hard_threshold_seconds(),
                resync_delay_ms: default_resync_delay_ms(),
            },
            system: SystemConfig {
                event_bus_capacity: default_event_bus_capacity(),
                stats_report_seconds: default_stats_report_seconds(),
            },
        }
    }
}

// Default value functions
fn default_replay_interval_ms() -> u64 {
    100
}
fn default_replay_loop() -> bool {
    false
}
fn default_channel_capacity() -> usize {
    1024
}

fn default_inactivity_seconds() -> u64 {
    180
}

fn default_path_loss_exponent() -> f64 {
    2.0
}
fn default_reference_power_dbm() -> i32 {
    -59
}

fn default_window_seconds() -> u32 {
    5
}

fn default_database_path() -> String {
    "./beacontrail.db".to_string()
}
fn default_kv_dir() -> String {
    "./beacontrail-kv".to_string()
}
fn default_batch_writes() -> bool {
    true
}
fn default_flush_delay_ms() -> u64 {
    250
}
fn default_allow_memory_fallback() -> bool {
    true
}

fn default_watchdog_enabled() -> bool {
    true
}
fn default_poll_interval_ms() -> u64 {
    1000
}
fn default_fast_mode() -> bool {
    false
}
fn default_soft_threshold_seconds() -> u64 {
    20
}
fn default_fast_soft_threshold_seconds() -> u64 {
    8
}
fn default_hard_threshold_seconds() -> u64 {
    60
}
fn default_resync_delay_ms() -> u64 {
    500
}

fn default_event_bus_capacity() -> usize {
    100
}
fn default_stats_report_seconds() -> u64 {
    60
}
