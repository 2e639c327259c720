//! Time-windowed de-duplication of bursty advertisement streams.
//!
//! Records fall into the same bucket only when they share a [`DeviceKey`] and
//! a wall-clock aligned window. Windows are fixed, not sliding.

use crate::config::{ClusterConfig, DistanceConfig};
use crate::device::DeviceKey;
use crate::distance::{estimate_from_dbm, DEFAULT_PATH_LOSS_EXPONENT};
use crate::record::{AdvertisementRecord, ClusteredRecord};
use std::collections::HashMap;

/// Anything that can be fed into the clusterer
///
/// Clustered records carry their existing count, so re-clustering an already
/// clustered sequence with the same window leaves it unchanged.
pub trait Clusterable {
    fn record(&self) -> &AdvertisementRecord;
    fn count(&self) -> u32;
}

impl Clusterable for AdvertisementRecord {
    fn record(&self) -> &AdvertisementRecord {
        self
    }

    fn count(&self) -> u32 {
        1
    }
}

impl Clusterable for ClusteredRecord {
    fn record(&self) -> &AdvertisementRecord {
        &self.record
    }

    fn count(&self) -> u32 {
        self.count
    }
}

#[derive(Debug, Clone)]
pub struct Clusterer {
    window_seconds: u32,
    path_loss_exponent: f64,
    reference_power_dbm: Option<i32>,
}

impl Clusterer {
    pub fn new(window_seconds: u32, path_loss_exponent: f64) -> Self {
        Self {
            window_seconds: window_seconds.max(1),
            path_loss_exponent,
            reference_power_dbm: None,
        }
    }

    pub fn from_config(cluster: &ClusterConfig, distance: &DistanceConfig) -> Self {
        Self::new(cluster.window_seconds, distance.path_loss_exponent)
            .with_reference_power(distance.reference_power_dbm)
    }

    /// Calibration used when a bucket has neither tx power nor an iBeacon calibration byte
    pub fn with_reference_power(mut self, reference_power_dbm: i32) -> Self {
        self.reference_power_dbm = Some(reference_power_dbm);
        self
    }

    pub fn window_seconds(&self) -> u32 {
        self.window_seconds
    }

    fn bucket_key(&self, record: &AdvertisementRecord) -> String {
        let window_ms = i64::from(self.window_seconds) * 1000;
        let window = record.event_time_ms().div_euclid(window_ms);
        format!("{}#{}", DeviceKey::of(record), window)
    }

    /// Merge records into one summary per device per window, ascending by timestamp
    pub fn cluster<R: Clusterable>(&self, records: &[R]) -> Vec<ClusteredRecord> {
        let mut index: HashMap<String, usize> = HashMap::new();
        let mut buckets: Vec<ClusteredRecord> = Vec::new();

        for item in records {
            let record = item.record();
            let key = self.bucket_key(record);

            match index.get(&key) {
                Some(&slot) => merge_into(&mut buckets[slot], record, item.count()),
                None => {
                    index.insert(key, buckets.len());
                    buckets.push(ClusteredRecord {
                        record: record.clone(),
                        count: item.count(),
                    });
                }
            }
        }

        for bucket in &mut buckets {
            let calibration = bucket
                .record
                .calibration_power()
                .or(self.reference_power_dbm);
            bucket.record.distance_m =
                estimate_from_dbm(bucket.record.rssi, calibration, self.path_loss_exponent);
        }

        // Stable, so equal timestamps keep first-seen order
        buckets.sort_by_key(|bucket| bucket.record.timestamp);
        buckets
    }
}

impl Default for Clusterer {
    fn default() -> Self {
        Self::new(5, DEFAULT_PATH_LOSS_EXPONENT)
    }
}

/// One-shot clustering with the default reference power
pub fn cluster<R: Clusterable>(
    records: &[R],
    window_seconds: u32,
    path_loss_exponent: f64,
) -> Vec<ClusteredRecord> {
    Clusterer::new(window_seconds, path_loss_exponent).cluster(records)
}

fn merge_into(bucket: &mut ClusteredRecord, incoming: &AdvertisementRecord, count: u32) {
    let merged = &mut bucket.record;

    merged.timestamp = incoming.timestamp;

    // Best signal wins, and its tx power travels with it
    if let Some(rssi) = incoming.rssi {
        if merged.rssi.map_or(true, |current| rssi > current) {
            merged.rssi = Some(rssi);
            merged.tx_power = incoming.tx_power;
        }
    }

    if incoming.has_position() {
        merged.latitude = incoming.latitude;
        merged.longitude = incoming.longitude;
    }

    for uuid in &incoming.service_uuids {
        if !merged.service_uuids.contains(uuid) {
            merged.service_uuids.push(uuid.clone());
        }
    }

    bucket.count += count;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};

    fn record(name: &str, uuid: &str, rssi: Option<i32>, offset_ms: i64) -> AdvertisementRecord {
        let base = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let mut record = AdvertisementRecord::at(base + ChronoDuration::milliseconds(offset_ms));
        record.device_name = Some(name.to_string());
        record.service_uuids = vec![uuid.to_string()];
        record.rssi = rssi;
        record
    }

    #[test]
    fn test_two_windows_best_signal() {
        let records = vec![
            record("A", "x", Some(-60), 0),
            record("A", "x", Some(-55), 2_000),
            record("A", "x", Some(-70), 6_000),
        ];

        let clusters = cluster(&records, 5, 2.0);
        assert_eq!(clusters.len(), 2);

        assert_eq!(clusters[0].record.rssi, Some(-55));
        assert_eq!(clusters[0].count, 2);
        // Timestamp is last-wins within the bucket
        assert_eq!(clusters[0].record.timestamp, records[1].timestamp);

        assert_eq!(clusters[1].record.rssi, Some(-70));
        assert_eq!(clusters[1].count, 1);
    }

    #[test]
    fn test_reclustering_is_idempotent() {
        let records = vec![
            record("A", "x", Some(-60), 0),
            record("a ", "x", Some(-58), 1_000),
            record("A", "x", None, 3_000),
        ];

        let once = cluster(&records, 5, 2.0);
        let twice = cluster(&once, 5, 2.0);
        assert_eq!(once.len(), 1);
        assert_eq!(once[0].count, 3);
        assert_eq!(twice, once);
    }

    #[test]
    fn test_devices_are_kept_apart() {
        let records = vec![
            record("A", "x", Some(-60), 0),
            record("B", "x", Some(-60), 100),
            record("A", "y", Some(-60), 200),
        ];
        assert_eq!(cluster(&records, 5, 2.0).len(), 3);
    }

    #[test]
    fn test_rssi_and_tx_power_adopted_together() {
        let mut weak = record("A", "x", Some(-80), 0);
        weak.tx_power = Some(-65);
        let mut strong = record("A", "x", Some(-50), 500);
        strong.tx_power = None;
        let mut weaker = record("A", "x", Some(-90), 900);
        weaker.tx_power = Some(-40);

        let clusters = cluster(&[weak, strong, weaker], 5, 2.0);
        assert_eq!(clusters[0].record.rssi, Some(-50));
        assert_eq!(clusters[0].record.tx_power, None);
    }

    #[test]
    fn test_position_is_most_recent_finite_fix() {
        let mut first = record("A", "x", Some(-50), 0);
        first.latitude = Some(50.0);
        first.longitude = Some(12.0);
        let mut second = record("A", "x", Some(-90), 1_000);
        second.latitude = Some(51.0);
        second.longitude = Some(13.0);
        let mut third = record("A", "x", Some(-90), 2_000);
        third.latitude = Some(f64::NAN);
        third.longitude = Some(14.0);

        let clusters = cluster(&[first, second, third], 5, 2.0);
        assert_eq!(clusters[0].record.latitude, Some(51.0));
        assert_eq!(clusters[0].record.longitude, Some(13.0));
    }

    #[test]
    fn test_uuids_union_and_distance_recomputed() {
        let mut first = record("A", "x", Some(-69), 0);
        first.distance_m = Some(42.0);
        let mut second = record("A", "x", Some(-79), 1_000);
        second.service_uuids = vec!["x".to_string(), "z".to_string()];

        let clusters = Clusterer::new(5, 2.0)
            .with_reference_power(-59)
            .cluster(&[first, second]);
        assert_eq!(clusters[0].record.service_uuids, vec!["x", "z"]);
        assert_eq!(clusters[0].record.distance_m, Some(3.16));
    }

    #[test]
    fn test_output_sorted_by_timestamp() {
        let records = vec![
            record("B", "x", Some(-60), 7_000),
            record("A", "x", Some(-60), 1_000),
        ];
        let clusters = cluster(&records, 5, 2.0);
        assert!(clusters[0].record.timestamp < clusters[1].record.timestamp);
        assert_eq!(clusters[0].record.device_name.as_deref(), Some("A"));
    }
}
