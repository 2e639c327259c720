use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use beacontrail::{
    export::{export_file_name, write_rows, ExportFormat},
    ingest::tally,
    record::parse_timestamp,
    BeaconConfig, Clusterer, RecordFilter, RecordStore,
};
use chrono::{DateTime, Utc};
use clap::Parser;
use tracing::{info, warn};

/// Query, export and maintain stored advertisement records.
#[derive(Parser, Debug)]
#[command(name = "beacontrail-export")]
#[command(about = "Export stored beacon advertisements as CSV or JSON")]
struct Args {
    /// Path to beacontrail configuration file (for storage locations)
    #[arg(short = 'c', long, default_value = "beacontrail.toml")]
    config: PathBuf,

    #[arg(short, long, value_enum, default_value = "csv")]
    format: ExportFormat,

    /// Output file or directory; stdout when omitted
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Merge repeated advertisements per device into windows of this many seconds
    #[arg(long, value_name = "SECONDS", num_args = 0..=1, default_missing_value = "0")]
    cluster: Option<u32>,

    /// Only records at or after this RFC 3339 timestamp
    #[arg(long, value_parser = parse_time)]
    from: Option<DateTime<Utc>>,

    /// Only records at or before this RFC 3339 timestamp
    #[arg(long, value_parser = parse_time)]
    to: Option<DateTime<Utc>>,

    #[arg(long, allow_negative_numbers = true)]
    rssi_min: Option<i32>,

    #[arg(long, allow_negative_numbers = true)]
    rssi_max: Option<i32>,

    /// Case-insensitive substring of the device name
    #[arg(long)]
    name: Option<String>,

    /// Apple devices and trackers
    #[arg(long)]
    apple: bool,

    /// Google Fast Pair devices
    #[arg(long)]
    fast_pair: bool,

    /// Industrial equipment (Samsung manufacturer data, FCF1 service, category)
    #[arg(long)]
    industrial: bool,

    /// Print how many records arrived in the last SECONDS and exit
    #[arg(long, value_name = "SECONDS")]
    rate: Option<u64>,

    /// Delete every stored record and exit
    #[arg(long)]
    clear: bool,

    /// Print the N most active devices and exit
    #[arg(long, value_name = "N")]
    top: Option<usize>,
}

fn parse_time(value: &str) -> std::result::Result<DateTime<Utc>, String> {
    parse_timestamp(value).ok_or_else(|| format!("'{}' is not an RFC 3339 timestamp", value))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("beacontrail=warn")),
        )
        .init();

    let args = Args::parse();
    let mut config = BeaconConfig::load_from_file(&args.config)
        .with_context(|| format!("Failed to load configuration from {}", args.config.display()))?;
    config.storage.batch_writes = false;

    let store = RecordStore::open(&config.storage, None).context("Failed to open storage")?;
    info!("Reading records from {} storage", store.active_tier());

    if args.clear {
        store.clear().await.context("Failed to clear records")?;
        println!("Cleared all records");
        return Ok(());
    }

    if let Some(seconds) = args.rate {
        let count = store
            .count_since(seconds, Utc::now())
            .await
            .context("Failed to count records")?;
        println!("{}", count);
        return Ok(());
    }

    let records = store.get_all().await.context("Failed to read records")?;
    let filter = RecordFilter {
        from: args.from,
        to: args.to,
        rssi_min: args.rssi_min,
        rssi_max: args.rssi_max,
        name: args.name.clone(),
        apple: args.apple,
        fast_pair: args.fast_pair,
        industrial: args.industrial,
    };
    let records = filter.apply(&records);

    if let Some(n) = args.top {
        for (device, packets) in tally(&records).top_devices(n) {
            println!("{}\t{}", packets, device);
        }
        return Ok(());
    }

    let target = output_path(args.output.as_deref(), args.format)?;
    let mut writer: Box<dyn Write> = match &target {
        Some(path) => Box::new(BufWriter::new(
            File::create(path).with_context(|| format!("Failed to create {}", path.display()))?,
        )),
        None => Box::new(BufWriter::new(io::stdout().lock())),
    };

    let written = match args.cluster {
        Some(window) => {
            let window = if window == 0 {
                config.cluster.window_seconds
            } else {
                window
            };
            let clusterer = Clusterer::new(window, config.distance.path_loss_exponent)
                .with_reference_power(config.distance.reference_power_dbm);
            let clustered = clusterer.cluster(&records);
            write_rows(&mut writer, &clustered, args.format)?;
            clustered.len()
        }
        None => {
            write_rows(&mut writer, &records, args.format)?;
            records.len()
        }
    };
    writer.flush()?;

    if written == 0 {
        warn!("No records matched");
    }
    if let Some(path) = target {
        eprintln!("Wrote {} rows to {}", written, path.display());
    }

    Ok(())
}

/// A directory gets a timestamped file name inside it
fn output_path(output: Option<&Path>, format: ExportFormat) -> Result<Option<PathBuf>> {
    let Some(output) = output else {
        return Ok(None);
    };

    if output.is_dir() {
        let name = export_file_name("beacontrail", format.extension(), Utc::now());
        return Ok(Some(output.join(name)));
    }

    match output.parent() {
        Some(parent) if !parent.as_os_str().is_empty() && !parent.exists() => Err(anyhow!(
            "Output directory {} does not exist",
            parent.display()
        )),
        _ => Ok(Some(output.to_path_buf())),
    }
}
