use crate::record::AdvertisementRecord;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Placeholder for a missing name or service UUID
pub const ABSENT: &str = "∅";

/// Heuristic device identity: normalized name plus first advertised service UUID
///
/// Not a hardware address. Distinct devices sharing a name and advertising no
/// (or rotating) service UUIDs collapse onto the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceKey(String);

impl DeviceKey {
    pub fn derive(name: Option<&str>, service_uuids: &[String]) -> Self {
        let name = match name {
            Some(name) if !name.is_empty() => name,
            _ => ABSENT,
        };
        let uuid = match service_uuids.first() {
            Some(uuid) if !uuid.is_empty() => uuid.as_str(),
            _ => ABSENT,
        };

        Self(format!("{}|{}", name.trim().to_lowercase(), uuid))
    }

    pub fn of(record: &AdvertisementRecord) -> Self {
        Self::derive(record.device_name.as_deref(), &record.service_uuids)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uuids(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_name_is_case_and_whitespace_insensitive() {
        assert_eq!(
            DeviceKey::derive(Some("Tile"), &uuids(&["abcd"])),
            DeviceKey::derive(Some("  tile "), &uuids(&["abcd"]))
        );
    }

    #[test]
    fn test_only_first_uuid_counts_and_is_exact() {
        assert_eq!(
            DeviceKey::derive(Some("Tile"), &uuids(&["abcd", "1111"])),
            DeviceKey::derive(Some("Tile"), &uuids(&["abcd", "2222"]))
        );
        assert_ne!(
            DeviceKey::derive(Some("Tile"), &uuids(&["abcd"])),
            DeviceKey::derive(Some("Tile"), &uuids(&["ABCD"]))
        );
    }

    #[test]
    fn test_absent_parts_use_placeholder() {
        assert_eq!(DeviceKey::derive(None, &[]).as_str(), "∅|∅");
        assert_eq!(DeviceKey::derive(Some(""), &uuids(&[""])).as_str(), "∅|∅");
        assert_eq!(DeviceKey::derive(Some("JBL Flip"), &[]).as_str(), "jbl flip|∅");
    }
}
