//! Beacon frame decoding.
//!
//! Turns raw manufacturer / service payloads into [`BeaconFields`]. Decoding is
//! lenient by design of the formats in the wild: an unknown frame type or a
//! truncated payload simply produces no fields, never an error.

use crate::record::{BeaconFields, BeaconType, APPLE_COMPANY_ID};
use std::collections::BTreeMap;

/// iBeacon prefix inside Apple manufacturer data: type 0x02, length 0x15
const IBEACON_MARKER: [u8; 2] = [0x02, 0x15];

/// Marker + 16-byte UUID + major + minor + tx power
const IBEACON_FRAME_LEN: usize = 2 + 16 + 2 + 2 + 1;

const EDDYSTONE_SERVICE: &str = "feaa";
const EDDYSTONE_SERVICE_FULL: &str = "0000feaa-0000-1000-8000-00805f9b34fb";

const EDDYSTONE_FRAME_URL: u8 = 0x10;
const EDDYSTONE_FRAME_TLM: u8 = 0x20;

/// Frame type + version + battery + temperature + advertisement count + seconds count
const EDDYSTONE_TLM_LEN: usize = 14;

const URL_SCHEMES: [&str; 4] = ["http://www.", "https://www.", "http://", "https://"];

const URL_EXPANSIONS: [&str; 14] = [
    ".com/", ".org/", ".edu/", ".net/", ".info/", ".biz/", ".gov/", ".com", ".org", ".edu",
    ".net", ".info", ".biz", ".gov",
];

/// Lowercase hex rendering of raw bytes
pub fn to_hex(bytes: &[u8]) -> String {
    hex::encode(bytes)
}

/// Parse a hex string back into bytes (`None` on odd length or non-hex characters)
pub fn from_hex(value: &str) -> Option<Vec<u8>> {
    hex::decode(value.trim()).ok()
}

/// Storage key of a company id: `0x` followed by four lowercase hex digits
pub fn company_key(company_id: u16) -> String {
    format!("0x{:04x}", company_id)
}

/// Parse a `0x004c` style company key
pub fn parse_company_key(key: &str) -> Option<u16> {
    let digits = key
        .strip_prefix("0x")
        .or_else(|| key.strip_prefix("0X"))
        .unwrap_or(key);
    u16::from_str_radix(digits, 16).ok()
}

/// Normalize manufacturer payloads into `{ "0x004c": "0215..." }`
pub fn manufacturer_to_hex(data: &BTreeMap<u16, Vec<u8>>) -> BTreeMap<String, String> {
    data.iter()
        .map(|(company, payload)| (company_key(*company), to_hex(payload)))
        .collect()
}

/// Normalize service payloads into `{ "feaa": "10..." }`
pub fn service_to_hex(data: &BTreeMap<String, Vec<u8>>) -> BTreeMap<String, String> {
    data.iter()
        .map(|(uuid, payload)| (uuid.clone(), to_hex(payload)))
        .collect()
}

/// Decode every recognized beacon frame
///
/// Eddystone fields are applied after iBeacon fields, so when both frames are
/// present `beacon_type` names the Eddystone frame.
pub fn decode(
    manufacturer: &BTreeMap<u16, Vec<u8>>,
    service: &BTreeMap<String, Vec<u8>>,
) -> BeaconFields {
    let mut fields = BeaconFields::default();

    if let Some(ibeacon) = manufacturer
        .get(&APPLE_COMPANY_ID)
        .and_then(|payload| decode_ibeacon(payload))
    {
        fields.merge_from(ibeacon);
    }

    if let Some(eddystone) = service
        .iter()
        .find(|(uuid, _)| is_eddystone_service(uuid))
        .and_then(|(_, payload)| decode_eddystone(payload))
    {
        fields.merge_from(eddystone);
    }

    fields
}

fn is_eddystone_service(uuid: &str) -> bool {
    uuid.eq_ignore_ascii_case(EDDYSTONE_SERVICE) || uuid.eq_ignore_ascii_case(EDDYSTONE_SERVICE_FULL)
}

/// Decode an iBeacon frame embedded anywhere in Apple manufacturer data
pub fn decode_ibeacon(payload: &[u8]) -> Option<BeaconFields> {
    // Apple payload layouts vary, so the marker is searched rather than assumed at offset 0
    let start = payload
        .windows(IBEACON_MARKER.len())
        .position(|window| window == IBEACON_MARKER)?;
    let frame = payload.get(start..start + IBEACON_FRAME_LEN)?;

    let uuid = &frame[2..18];
    let major = u16::from_be_bytes([frame[18], frame[19]]);
    let minor = u16::from_be_bytes([frame[20], frame[21]]);
    let tx_power = frame[22] as i8;

    Some(BeaconFields {
        beacon_type: Some(BeaconType::IBeacon),
        beacon_uuid: Some(format_uuid(uuid)),
        beacon_major: Some(major),
        beacon_minor: Some(minor),
        beacon_tx_power: Some(tx_power),
        ..BeaconFields::default()
    })
}

/// Render 16 bytes as `8-4-4-4-12` lowercase hex groups
fn format_uuid(bytes: &[u8]) -> String {
    let hex = to_hex(bytes);
    format!(
        "{}-{}-{}-{}-{}",
        &hex[0..8],
        &hex[8..12],
        &hex[12..16],
        &hex[16..20],
        &hex[20..32]
    )
}

/// Decode an Eddystone service data frame (URL or TLM)
pub fn decode_eddystone(payload: &[u8]) -> Option<BeaconFields> {
    match payload.first()? {
        &EDDYSTONE_FRAME_URL => decode_eddystone_url(payload),
        &EDDYSTONE_FRAME_TLM => decode_eddystone_tlm(payload),
        _ => None,
    }
}

fn decode_eddystone_url(payload: &[u8]) -> Option<BeaconFields> {
    // 0x10 | tx power | scheme | encoded url...
    if payload.len() < 3 {
        return None;
    }

    let tx_power = payload[1] as i8;
    let scheme = URL_SCHEMES
        .get(payload[2] as usize)
        .copied()
        .unwrap_or_default();

    let mut url = String::from(scheme);
    for &byte in &payload[3..] {
        match URL_EXPANSIONS.get(byte as usize) {
            Some(expansion) => url.push_str(expansion),
            None => url.push(byte as char),
        }
    }

    Some(BeaconFields {
        beacon_type: Some(BeaconType::EddystoneUrl),
        eddystone_url: Some(url),
        eddystone_tx: Some(tx_power),
        ..BeaconFields::default()
    })
}

fn decode_eddystone_tlm(payload: &[u8]) -> Option<BeaconFields> {
    // 0x20 | version | vbatt[2] | temp[2] 8.8 fixed point | adv count[4] | sec count[4]
    let frame = payload.get(..EDDYSTONE_TLM_LEN)?;

    let version = frame[1];
    let vbatt = u16::from_be_bytes([frame[2], frame[3]]);
    let temp_raw = i16::from_be_bytes([frame[4], frame[5]]);
    let adv_count = u32::from_be_bytes([frame[6], frame[7], frame[8], frame[9]]);
    let sec_count = u32::from_be_bytes([frame[10], frame[11], frame[12], frame[13]]);

    Some(BeaconFields {
        beacon_type: Some(BeaconType::EddystoneTlm),
        eddystone_version: Some(version),
        eddystone_vbatt_mv: Some(vbatt),
        eddystone_temp_c: Some(f64::from(temp_raw) / 256.0),
        eddystone_adv_count: Some(adv_count),
        eddystone_sec_count: Some(sec_count),
        ..BeaconFields::default()
    })
}
