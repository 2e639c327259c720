use crate::cluster::Clusterable;
use crate::record::{AdvertisementRecord, APPLE_COMPANY_ID};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Company id assigned to Samsung
pub const SAMSUNG_COMPANY_ID: u16 = 0x0075;

const FAST_PAIR_SERVICE: &str = "fef3";
const INDUSTRIAL_SERVICE: &str = "fcf1";
const INDUSTRIAL_SERVICE_FULL: &str = "0000fcf1-0000-1000-8000-00805f9b34fb";

/// Conjunctive record predicate; unset criteria match everything
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordFilter {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub rssi_min: Option<i32>,
    pub rssi_max: Option<i32>,
    pub name: Option<String>,
    pub apple: bool,
    pub fast_pair: bool,
    pub industrial: bool,
}

impl RecordFilter {
    pub fn is_empty(&self) -> bool {
        *self == RecordFilter::default()
    }

    pub fn matches(&self, record: &AdvertisementRecord) -> bool {
        if self.from.is_some_and(|from| record.timestamp < from) {
            return false;
        }
        if self.to.is_some_and(|to| record.timestamp > to) {
            return false;
        }

        if self.rssi_min.is_some() || self.rssi_max.is_some() {
            let Some(rssi) = record.rssi else {
                return false;
            };
            if self.rssi_min.is_some_and(|min| rssi < min) {
                return false;
            }
            if self.rssi_max.is_some_and(|max| rssi > max) {
                return false;
            }
        }

        if let Some(needle) = self.name.as_deref().filter(|n| !n.is_empty()) {
            let name = record.device_name.as_deref().unwrap_or_default().to_lowercase();
            if !name.contains(&needle.to_lowercase()) {
                return false;
            }
        }

        let category = record.category.to_lowercase();

        if self.apple && !(record.has_company(APPLE_COMPANY_ID) || category.contains("tracker")) {
            return false;
        }

        if self.fast_pair {
            let advertises_fast_pair = record
                .service_uuids
                .iter()
                .any(|uuid| uuid.to_lowercase().contains(FAST_PAIR_SERVICE));
            if !(advertises_fast_pair || category.contains("fast pair")) {
                return false;
            }
        }

        if self.industrial {
            let industrial_service = record.service_data.keys().any(|key| {
                key.eq_ignore_ascii_case(INDUSTRIAL_SERVICE)
                    || key.eq_ignore_ascii_case(INDUSTRIAL_SERVICE_FULL)
            });
            if !(record.has_company(SAMSUNG_COMPANY_ID)
                || industrial_service
                || category.contains("industrie"))
            {
                return false;
            }
        }

        true
    }

    /// Keep the matching items, raw or clustered, in their original order
    pub fn apply<R: Clusterable + Clone>(&self, items: &[R]) -> Vec<R> {
        items
            .iter()
            .filter(|item| self.matches(item.record()))
            .cloned()
            .collect()
    }
}
