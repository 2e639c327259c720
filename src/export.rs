//! CSV and JSON rendering of stored or clustered records.

use crate::record::{format_timestamp, AdvertisementRecord, ClusteredRecord};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Display;
use std::io::Write;

pub const CSV_COLUMNS: [&str; 26] = [
    "timestamp",
    "deviceName",
    "serviceUUIDs",
    "rssi",
    "txPower",
    "latitude",
    "longitude",
    "sessionId",
    "category",
    "vendor",
    "icon",
    "count",
    "manufacturerData",
    "serviceData",
    "beaconType",
    "beaconUUID",
    "beaconMajor",
    "beaconMinor",
    "beaconTxPower",
    "eddystoneURL",
    "eddystoneTx",
    "eddystoneVersion",
    "eddystoneVBatt_mV",
    "eddystoneTemp_C",
    "eddystoneAdvCount",
    "eddystoneSecCount",
];

/// Output format of the export tool
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ExportFormat {
    Csv,
    Json,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Json => "json",
        }
    }
}

/// A row that can be exported; raw records have no count
pub trait ExportRow: Serialize {
    fn record(&self) -> &AdvertisementRecord;
    fn count(&self) -> Option<u32>;
}

impl ExportRow for AdvertisementRecord {
    fn record(&self) -> &AdvertisementRecord {
        self
    }

    fn count(&self) -> Option<u32> {
        None
    }
}

impl ExportRow for ClusteredRecord {
    fn record(&self) -> &AdvertisementRecord {
        &self.record
    }

    fn count(&self) -> Option<u32> {
        Some(self.count)
    }
}

fn opt<T: Display>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn json_map(map: &BTreeMap<String, String>) -> String {
    serde_json::to_string(map).unwrap_or_default()
}

fn csv_fields<R: ExportRow>(row: &R) -> Vec<String> {
    let record = row.record();
    let beacon = &record.beacon;

    vec![
        format_timestamp(&record.timestamp),
        record.device_name.clone().unwrap_or_default(),
        record.service_uuids.join(";"),
        opt(record.rssi),
        opt(record.tx_power),
        opt(record.latitude),
        opt(record.longitude),
        record.session_id.clone(),
        record.category.clone(),
        record.vendor.clone(),
        record.icon.clone(),
        opt(row.count()),
        json_map(&record.manufacturer_data),
        json_map(&record.service_data),
        opt(beacon.beacon_type.map(|t| t.as_str())),
        opt(beacon.beacon_uuid.as_deref()),
        opt(beacon.beacon_major),
        opt(beacon.beacon_minor),
        opt(beacon.beacon_tx_power),
        opt(beacon.eddystone_url.as_deref()),
        opt(beacon.eddystone_tx),
        opt(beacon.eddystone_version),
        opt(beacon.eddystone_vbatt_mv),
        opt(beacon.eddystone_temp_c),
        opt(beacon.eddystone_adv_count),
        opt(beacon.eddystone_sec_count),
    ]
}

/// Header plus one fully quoted line per row
pub fn write_csv<W: Write, R: ExportRow>(writer: W, rows: &[R]) -> std::io::Result<()> {
    let mut wtr = csv::WriterBuilder::new()
        .quote_style(csv::QuoteStyle::Always)
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(writer);

    wtr.write_record(CSV_COLUMNS)?;
    for row in rows {
        wtr.write_record(csv_fields(row))?;
    }
    wtr.flush()
}

pub fn write_json<W: Write, R: ExportRow>(mut writer: W, rows: &[R]) -> std::io::Result<()> {
    serde_json::to_writer_pretty(&mut writer, rows)?;
    writeln!(writer)?;
    writer.flush()
}

pub fn write_rows<W: Write, R: ExportRow>(
    writer: W,
    rows: &[R],
    format: ExportFormat,
) -> std::io::Result<()> {
    match format {
        ExportFormat::Csv => write_csv(writer, rows),
        ExportFormat::Json => write_json(writer, rows),
    }
}

/// `<prefix>_<ISO timestamp with ':' replaced by '-'>.<ext>`
pub fn export_file_name(prefix: &str, extension: &str, now: DateTime<Utc>) -> String {
    format!(
        "{}_{}.{}",
        prefix,
        format_timestamp(&now).replace(':', "-"),
        extension
    )
}
