//! Record shapes flowing through the pipeline.
//!
//! Field names serialize exactly as exporters expect them (`deviceName`,
//! `serviceUUIDs`, `eddystoneVBatt_mV`, ...). Every field that can be missing
//! on the wire is an explicit `Option`, so downstream code never has to guess
//! whether a value was filled in.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;

/// Company identifier assigned to Apple
pub const APPLE_COMPANY_ID: u16 = 0x004C;

/// One raw advertisement as delivered by the scan producer
///
/// Any field may be absent; the ingest pipeline normalizes it once.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AdvertisementEvent {
    pub device_name: Option<String>,
    pub service_uuids: Option<Vec<String>>,
    /// Signal strength in dBm
    pub rssi: Option<f64>,
    /// Calibrated transmit power in dBm
    pub tx_power: Option<f64>,
    /// Raw manufacturer payloads keyed by 16-bit company id
    pub manufacturer_data: BTreeMap<u16, Vec<u8>>,
    /// Raw service payloads keyed by service UUID
    pub service_data: BTreeMap<String, Vec<u8>>,
}

impl AdvertisementEvent {
    pub fn named<S: Into<String>>(name: S) -> Self {
        Self {
            device_name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn with_rssi(mut self, rssi: f64) -> Self {
        self.rssi = Some(rssi);
        self
    }

    pub fn with_tx_power(mut self, tx_power: f64) -> Self {
        self.tx_power = Some(tx_power);
        self
    }

    pub fn with_service_uuid<S: Into<String>>(mut self, uuid: S) -> Self {
        self.service_uuids
            .get_or_insert_with(Vec::new)
            .push(uuid.into());
        self
    }

    pub fn with_manufacturer_data(mut self, company_id: u16, payload: Vec<u8>) -> Self {
        self.manufacturer_data.insert(company_id, payload);
        self
    }

    pub fn with_service_data<S: Into<String>>(mut self, uuid: S, payload: Vec<u8>) -> Self {
        self.service_data.insert(uuid.into(), payload);
        self
    }
}

/// Last known position of the scanning device
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoFix {
    pub latitude: f64,
    pub longitude: f64,
}

/// Decoded beacon frame type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BeaconType {
    #[serde(rename = "iBeacon")]
    IBeacon,
    #[serde(rename = "Eddystone-URL")]
    EddystoneUrl,
    #[serde(rename = "Eddystone-TLM")]
    EddystoneTlm,
}

impl BeaconType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BeaconType::IBeacon => "iBeacon",
            BeaconType::EddystoneUrl => "Eddystone-URL",
            BeaconType::EddystoneTlm => "Eddystone-TLM",
        }
    }

    pub fn is_eddystone(&self) -> bool {
        matches!(self, BeaconType::EddystoneUrl | BeaconType::EddystoneTlm)
    }
}

/// Fields recovered from iBeacon / Eddystone payloads
///
/// Absent fields are omitted from the serialized record entirely.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BeaconFields {
    #[serde(rename = "beaconType", default, skip_serializing_if = "Option::is_none")]
    pub beacon_type: Option<BeaconType>,
    #[serde(rename = "beaconUUID", default, skip_serializing_if = "Option::is_none")]
    pub beacon_uuid: Option<String>,
    #[serde(rename = "beaconMajor", default, skip_serializing_if = "Option::is_none")]
    pub beacon_major: Option<u16>,
    #[serde(rename = "beaconMinor", default, skip_serializing_if = "Option::is_none")]
    pub beacon_minor: Option<u16>,
    #[serde(rename = "beaconTxPower", default, skip_serializing_if = "Option::is_none")]
    pub beacon_tx_power: Option<i8>,
    #[serde(rename = "eddystoneURL", default, skip_serializing_if = "Option::is_none")]
    pub eddystone_url: Option<String>,
    #[serde(rename = "eddystoneTx", default, skip_serializing_if = "Option::is_none")]
    pub eddystone_tx: Option<i8>,
    #[serde(rename = "eddystoneVersion", default, skip_serializing_if = "Option::is_none")]
    pub eddystone_version: Option<u8>,
    #[serde(rename = "eddystoneVBatt_mV", default, skip_serializing_if = "Option::is_none")]
    pub eddystone_vbatt_mv: Option<u16>,
    #[serde(rename = "eddystoneTemp_C", default, skip_serializing_if = "Option::is_none")]
    pub eddystone_temp_c: Option<f64>,
    #[serde(rename = "eddystoneAdvCount", default, skip_serializing_if = "Option::is_none")]
    pub eddystone_adv_count: Option<u32>,
    #[serde(rename = "eddystoneSecCount", default, skip_serializing_if = "Option::is_none")]
    pub eddystone_sec_count: Option<u32>,
}

impl BeaconFields {
    pub fn is_empty(&self) -> bool {
        *self == BeaconFields::default()
    }

    /// Overlay every field present in `other` onto `self`
    pub fn merge_from(&mut self, other: BeaconFields) {
        macro_rules! take {
            ($($field:ident),*) => {
                $(if other.$field.is_some() { self.$field = other.$field; })*
            };
        }
        take!(
            beacon_type,
            beacon_uuid,
            beacon_major,
            beacon_minor,
            beacon_tx_power,
            eddystone_url,
            eddystone_tx,
            eddystone_version,
            eddystone_vbatt_mv,
            eddystone_temp_c,
            eddystone_adv_count,
            eddystone_sec_count
        );
    }
}

/// One enriched advertisement as persisted by the storage engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdvertisementRecord {
    #[serde(with = "iso_millis")]
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "deviceName", default)]
    pub device_name: Option<String>,
    #[serde(rename = "serviceUUIDs", default)]
    pub service_uuids: Vec<String>,
    #[serde(default)]
    pub rssi: Option<i32>,
    #[serde(rename = "txPower", default)]
    pub tx_power: Option<i32>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(rename = "sessionId", default)]
    pub session_id: String,
    #[serde(rename = "manufacturerData", default)]
    pub manufacturer_data: BTreeMap<String, String>,
    #[serde(rename = "serviceData", default)]
    pub service_data: BTreeMap<String, String>,
    #[serde(flatten)]
    pub beacon: BeaconFields,
    #[serde(rename = "distanceM", default)]
    pub distance_m: Option<f64>,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub vendor: String,
    #[serde(default)]
    pub icon: String,
}

impl AdvertisementRecord {
    /// Empty record observed at `timestamp`
    pub fn at(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            device_name: None,
            service_uuids: Vec::new(),
            rssi: None,
            tx_power: None,
            latitude: None,
            longitude: None,
            session_id: String::new(),
            manufacturer_data: BTreeMap::new(),
            service_data: BTreeMap::new(),
            beacon: BeaconFields::default(),
            distance_m: None,
            category: String::new(),
            vendor: String::new(),
            icon: String::new(),
        }
    }

    /// Event time in milliseconds since the Unix epoch
    pub fn event_time_ms(&self) -> i64 {
        self.timestamp.timestamp_millis()
    }

    /// Reference power for distance estimation: advertised tx power, else the iBeacon calibration byte
    pub fn calibration_power(&self) -> Option<i32> {
        self.tx_power
            .or_else(|| self.beacon.beacon_tx_power.map(i32::from))
    }

    /// Whether manufacturer data carries a payload for `company_id`
    pub fn has_company(&self, company_id: u16) -> bool {
        self.manufacturer_data
            .contains_key(&crate::decoder::company_key(company_id))
    }

    pub fn has_position(&self) -> bool {
        matches!(
            (self.latitude, self.longitude),
            (Some(lat), Some(lon)) if lat.is_finite() && lon.is_finite()
        )
    }
}

/// All advertisements of one device within one time window, merged
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusteredRecord {
    #[serde(flatten)]
    pub record: AdvertisementRecord,
    pub count: u32,
}

/// Render a timestamp the way records store it: RFC 3339, millisecond precision, `Z` suffix
pub fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse an RFC 3339 timestamp into UTC
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

pub mod iso_millis {
    use super::*;

    pub fn serialize<S: Serializer>(
        timestamp: &DateTime<Utc>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format_timestamp(timestamp))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<DateTime<Utc>, D::Error> {
        let value = String::deserialize(deserializer)?;
        parse_timestamp(&value)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {}", value)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_record() -> AdvertisementRecord {
        let mut record =
            AdvertisementRecord::at(Utc.with_ymd_and_hms(2024, 3, 9, 8, 15, 30).unwrap());
        record.device_name = Some("Tile".to_string());
        record.service_uuids = vec!["feed".to_string()];
        record.rssi = Some(-61);
        record.session_id = "20240309-1".to_string();
        record
            .manufacturer_data
            .insert("0x004c".to_string(), "0215".to_string());
        record.beacon.beacon_type = Some(BeaconType::EddystoneTlm);
        record.beacon.eddystone_vbatt_mv = Some(3000);
        record.beacon.eddystone_temp_c = Some(21.5);
        record.distance_m = Some(1.12);
        record
    }

    #[test]
    fn test_record_field_names() {
        let json = serde_json::to_value(sample_record()).unwrap();
        let object = json.as_object().unwrap();

        assert_eq!(object["timestamp"], "2024-03-09T08:15:30.000Z");
        assert_eq!(object["deviceName"], "Tile");
        assert_eq!(object["serviceUUIDs"][0], "feed");
        assert_eq!(object["sessionId"], "20240309-1");
        assert_eq!(object["beaconType"], "Eddystone-TLM");
        assert_eq!(object["eddystoneVBatt_mV"], 3000);
        assert_eq!(object["eddystoneTemp_C"], 21.5);
        assert_eq!(object["distanceM"], 1.12);
        assert!(object["txPower"].is_null());
        // Undecoded beacon fields are omitted, not null
        assert!(!object.contains_key("beaconUUID"));
    }

    #[test]
    fn test_clustered_record_flattens_with_count() {
        let clustered = ClusteredRecord {
            record: sample_record(),
            count: 4,
        };
        let json = serde_json::to_string(&clustered).unwrap();
        let back: ClusteredRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, clustered);
        assert!(json.contains("\"count\":4"));
    }

    #[test]
    fn test_calibration_power_prefers_advertised_tx() {
        let mut record = sample_record();
        record.beacon.beacon_tx_power = Some(-65);
        assert_eq!(record.calibration_power(), Some(-65));

        record.tx_power = Some(-50);
        assert_eq!(record.calibration_power(), Some(-50));
    }

    #[test]
    fn test_has_company_and_position() {
        let mut record = sample_record();
        assert!(record.has_company(APPLE_COMPANY_ID));
        assert!(!record.has_company(0x0075));

        assert!(!record.has_position());
        record.latitude = Some(50.71);
        record.longitude = Some(12.49);
        assert!(record.has_position());
        record.longitude = Some(f64::NAN);
        assert!(!record.has_position());
    }

    #[test]
    fn test_beacon_fields_merge_overlays_present_fields() {
        let mut base = BeaconFields {
            beacon_type: Some(BeaconType::IBeacon),
            beacon_major: Some(1),
            ..BeaconFields::default()
        };
        base.merge_from(BeaconFields {
            beacon_type: Some(BeaconType::EddystoneUrl),
            eddystone_url: Some("https://x.org".to_string()),
            ..BeaconFields::default()
        });

        assert_eq!(base.beacon_type, Some(BeaconType::EddystoneUrl));
        assert_eq!(base.beacon_major, Some(1));
        assert_eq!(base.eddystone_url.as_deref(), Some("https://x.org"));
    }
}
