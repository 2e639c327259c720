use anyhow::{Context, Result};
use beacontrail::{BeaconConfig, ScanOrchestrator};
use clap::Parser;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;

#[derive(Parser, Debug)]
#[command(name = "beacontrail")]
#[command(about = "Proximity beacon logger: decodes, enriches and stores BLE advertisements")]
#[command(version)]
#[command(long_about = "Consumes BLE advertisement packets, decodes iBeacon and Eddystone frames, \
estimates distance, classifies devices and persists every packet into a tiered store \
(SQLite, then a key-value directory, then memory). A watchdog restarts scanning when \
the advertisement stream goes quiet.")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "beacontrail.toml", help = "Path to TOML configuration file")]
    config: String,

    /// Enable debug logging (most verbose)
    #[arg(short, long, help = "Enable debug level logging")]
    debug: bool,

    /// Enable verbose logging (info level)
    #[arg(short, long, help = "Enable verbose info level logging")]
    verbose: bool,

    /// Enable quiet mode (errors only)
    #[arg(short, long, help = "Enable quiet mode - only log errors")]
    quiet: bool,

    #[arg(long, help = "Validate configuration file and exit without scanning")]
    validate_config: bool,

    #[arg(long, help = "Print default configuration in TOML format and exit")]
    print_config: bool,

    #[arg(long, help = "Open storage and exit without scanning")]
    dry_run: bool,

    #[arg(long, value_name = "FORMAT", help = "Log output format: json, pretty, or compact")]
    log_format: Option<String>,

    #[arg(long, value_name = "DIR", help = "Also write daily rolling log files into DIR")]
    log_dir: Option<String>,

    #[arg(long, help = "Enable terminal hotkeys: 'r' resync, 'q' quit")]
    keyboard: bool,

    #[arg(long, help = "High advertisement rate: use the shorter watchdog soft threshold")]
    fast: bool,

    #[arg(long, value_name = "FILE", help = "Replay a JSON-lines advertisement capture")]
    replay: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_config {
        print_default_config();
        return Ok(());
    }

    let log_guard = init_logging(&args)?;

    info!("Starting beacontrail v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", args.config);

    let mut config = BeaconConfig::load_from_file(&args.config)
        .with_context(|| format!("Failed to load configuration from {}", args.config))?;

    if let Some(replay) = &args.replay {
        config.scanner.replay_path = Some(replay.clone());
    }
    if args.fast {
        config.watchdog.fast_mode = true;
    }

    if args.validate_config {
        match config.validate() {
            Ok(()) => {
                info!("Configuration validation successful");
                println!("✓ Configuration is valid");
                return Ok(());
            }
            Err(e) => {
                error!("Configuration validation failed: {}", e);
                eprintln!("✗ Configuration validation failed: {}", e);
                std::process::exit(1);
            }
        }
    }
    config.validate().context("Invalid configuration")?;

    let mut orchestrator = ScanOrchestrator::new(config).context("Failed to create orchestrator")?;
    orchestrator.set_keyboard_enabled(args.keyboard);

    orchestrator
        .initialize()
        .await
        .context("Failed to initialize storage")?;

    if args.dry_run {
        info!("Dry run mode - storage opened, scanning not started");
        if let Some(store) = orchestrator.store() {
            println!("✓ Dry run completed - storage ready on {} tier", store.active_tier());
        }
        return Ok(());
    }

    orchestrator
        .start()
        .await
        .context("Failed to start scanning")?;

    let exit_code = orchestrator.run().await.map_err(|e| {
        error!("System error during execution: {}", e);
        e
    })?;

    info!("beacontrail exited with code: {}", exit_code);
    drop(log_guard);
    std::process::exit(exit_code);
}

fn init_logging(args: &Args) -> Result<Option<WorkerGuard>> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    let log_level = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else if args.quiet {
        "error"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("beacontrail={}", log_level)));

    let fmt_layer = match args.log_format.as_deref() {
        Some("json") => fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        Some("compact") => fmt::layer()
            .compact()
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .boxed(),
        Some("pretty") | None => fmt::layer()
            .pretty()
            .with_target(true)
            .with_thread_ids(args.debug)
            .with_file(args.debug)
            .with_line_number(args.debug)
            .boxed(),
        Some(format) => {
            eprintln!("Warning: Unknown log format '{}', using default", format);
            fmt::layer()
                .with_target(true)
                .with_thread_ids(args.debug)
                .with_file(args.debug)
                .with_line_number(args.debug)
                .boxed()
        }
    };

    let (file_layer, guard) = match &args.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory {}", dir))?;
            let appender = tracing_appender::rolling::daily(dir, "beacontrail.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_ansi(false)
                .with_target(true)
                .with_writer(writer)
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(file_layer)
        .with(env_filter)
        .init();

    Ok(guard)
}

/// Print default configuration in TOML format
fn print_default_config() {
    println!("# beacontrail configuration file");
    println!("# This is the default configuration with all available options");
    println!("# Every key can be overridden from the environment as BEACONTRAIL_<SECTION>__<KEY>,");
    println!("# e.g. BEACONTRAIL_CLUSTER__WINDOW_SECONDS=10");
    println!();

    let default_config = r#"[scanner]
# JSON-lines advertisement capture to replay (optional)
# replay_path = "./capture.jsonl"
# Delay between replayed advertisements
replay_interval_ms = 100
# Start over when the capture is exhausted
replay_loop = false
# Advertisements buffered between the scan producer and ingest
channel_capacity = 1024

[session]
# Silence after which the next advertisement opens a new session
inactivity_seconds = 180
# IANA zone for session date keys (optional, host local time when absent)
# timezone = "Europe/Berlin"

[distance]
# Path-loss exponent (2.0 = free space)
path_loss_exponent = 2.0
# Expected RSSI at one metre when the packet carries no calibration
reference_power_dbm = -59

[cluster]
# Bucket width for grouping repeated advertisements
window_seconds = 5

[storage]
# SQLite database (primary tier)
database_path = "./beacontrail.db"
# Directory of the key-value fallback tier
kv_dir = "./beacontrail-kv"
# Queue records and commit them in debounced batches
batch_writes = true
flush_delay_ms = 250
# Keep running on an in-memory list when no durable tier opens
allow_memory_fallback = true

[watchdog]
enabled = true
poll_interval_ms = 1000
# Shorter soft threshold for high advertisement rates
fast_mode = false
# Silence before a quick resubscribe
soft_threshold_seconds = 20
fast_soft_threshold_seconds = 8
# Silence before a full resync
hard_threshold_seconds = 60
# Pause between stop and start during a full resync
resync_delay_ms = 500

[system]
# Event bus capacity
event_bus_capacity = 100
# Interval of the status log line (0 disables it)
stats_report_seconds = 60
"#;

    println!("{}", default_config);
}
