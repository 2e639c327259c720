//! Rule-table device classification.
//!
//! Rules are evaluated top to bottom against the lowercased device name and
//! the first match wins, so the table order is part of the behavior.

use crate::record::{AdvertisementRecord, BeaconType, APPLE_COMPANY_ID};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub category: String,
    pub vendor: String,
    pub icon: String,
}

impl Classification {
    fn new(category: &str, vendor: &str, icon: &str) -> Self {
        Self {
            category: category.to_string(),
            vendor: vendor.to_string(),
            icon: icon.to_string(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.category.is_empty() && self.vendor.is_empty() && self.icon.is_empty()
    }
}

struct NameRule {
    needles: &'static [&'static str],
    category: &'static str,
    vendor: &'static str,
    icon: &'static str,
}

const NAME_RULES: &[NameRule] = &[
    NameRule {
        needles: &["jbl"],
        category: "Audio",
        vendor: "JBL",
        icon: "🎵",
    },
    NameRule {
        needles: &["sierzega"],
        category: "Verkehr",
        vendor: "Sierzega",
        icon: "🚦",
    },
    NameRule {
        needles: &["dtco", "tachograph"],
        category: "Fahrzeug",
        vendor: "DTCO",
        icon: "🚛",
    },
    NameRule {
        needles: &["garmin"],
        category: "Wearable",
        vendor: "Garmin",
        icon: "⌚",
    },
    NameRule {
        needles: &["mi", "xiaomi"],
        category: "Elektronik",
        vendor: "Xiaomi",
        icon: "📱",
    },
    NameRule {
        needles: &["bosch"],
        category: "Industrie",
        vendor: "Bosch",
        icon: "🏭",
    },
    NameRule {
        needles: &["vw", "volkswagen"],
        category: "Fahrzeug",
        vendor: "Volkswagen",
        icon: "🚗",
    },
];

/// Classify by device name; no name or no matching rule gives an empty classification
pub fn classify(device_name: Option<&str>) -> Classification {
    let Some(name) = device_name else {
        return Classification::default();
    };
    let name = name.to_lowercase();

    NAME_RULES
        .iter()
        .find(|rule| rule.needles.iter().any(|needle| name.contains(needle)))
        .map(|rule| Classification::new(rule.category, rule.vendor, rule.icon))
        .unwrap_or_default()
}

/// Classify from decoded beacon data alone
pub fn classify_from_decoded(record: &AdvertisementRecord) -> Classification {
    match record.beacon.beacon_type {
        Some(BeaconType::IBeacon) => Classification::new("Tracker", "Apple", "📍"),
        Some(kind) if kind.is_eddystone() => Classification::new("Beacon", "Eddystone", "📡"),
        _ if record.has_company(APPLE_COMPANY_ID) => Classification::new("Tracker", "Apple", "📍"),
        _ => Classification::default(),
    }
}

/// Name rules first, decoded-frame fallback only when they produced nothing
pub fn profile(record: &AdvertisementRecord) -> Classification {
    let by_name = classify(record.device_name.as_deref());
    if !by_name.is_empty() {
        return by_name;
    }
    classify_from_decoded(record)
}
