use thiserror::Error;

#[derive(Error, Debug)]
pub enum BeaconError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("Deserialization error: {0}")]
    Deserialization(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Scanner error: {0}")]
    Scanner(#[from] ScannerError),

    #[error("Event bus error: {0}")]
    EventBus(#[from] EventBusError),

    #[error("System error: {message}")]
    System { message: String },

    #[error("Component error in {component}: {message}")]
    Component { component: String, message: String },
}

/// Failures inside the persistence tiers
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to open {tier} storage: {details}")]
    Open { tier: String, details: String },

    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Record serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Stored data is corrupt: {details}")]
    Corrupt { details: String },

    #[error("No storage tier could be opened")]
    NoTierAvailable,

    #[error("Storage task failed: {details}")]
    Task { details: String },
}

/// Failures at the scan producer boundary
#[derive(Error, Debug, Clone)]
pub enum ScannerError {
    #[error("Scanning not available: {details}")]
    NotAvailable { details: String },

    #[error("Scan producer {producer} failed to start: {details}")]
    StartFailed { producer: String, details: String },

    #[error("Scan already running")]
    AlreadyRunning,

    #[error("Replay capture {path} unreadable: {details}")]
    Replay { path: String, details: String },
}

#[derive(Error, Debug, Clone)]
pub enum EventBusError {
    #[error("Failed to publish event: {details}")]
    PublishFailed { details: String },

    #[error("Event bus channel closed")]
    ChannelClosed,
}

impl BeaconError {
    pub fn system<S: Into<String>>(message: S) -> Self {
        Self::System {
            message: message.into(),
        }
    }

    pub fn component<C: Into<String>, M: Into<String>>(component: C, message: M) -> Self {
        Self::Component {
            component: component.into(),
            message: message.into(),
        }
    }

    /// Whether retrying the failed operation can reasonably succeed
    pub fn is_recoverable(&self) -> bool {
        match self {
            BeaconError::Scanner(ScannerError::StartFailed { .. }) => true,
            BeaconError::Scanner(ScannerError::AlreadyRunning) => true,
            BeaconError::Scanner(_) => false,
            BeaconError::Storage(StorageError::NoTierAvailable) => false,
            BeaconError::Storage(_) => true,
            BeaconError::EventBus(_) => true,
            BeaconError::Io(_) => true,
            BeaconError::Config(_)
            | BeaconError::Serialization(_)
            | BeaconError::Deserialization(_)
            | BeaconError::Json(_) => false,
            BeaconError::System { .. } | BeaconError::Component { .. } => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, BeaconError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_classification() {
        let start = BeaconError::from(ScannerError::StartFailed {
            producer: "replay".to_string(),
            details: "adapter busy".to_string(),
        });
        assert!(start.is_recoverable());

        let no_tier = BeaconError::from(StorageError::NoTierAvailable);
        assert!(!no_tier.is_recoverable());

        let unavailable = BeaconError::from(ScannerError::NotAvailable {
            details: "no radio".to_string(),
        });
        assert!(!unavailable.is_recoverable());
    }

    #[test]
    fn test_error_messages_carry_cause() {
        let err = BeaconError::from(ScannerError::StartFailed {
            producer: "replay".to_string(),
            details: "file missing".to_string(),
        });
        let message = err.to_string();
        assert!(message.contains("replay"));
        assert!(message.contains("file missing"));

        let err = BeaconError::component("storage", "disk full");
        assert_eq!(err.to_string(), "Component error in storage: disk full");
    }
}
