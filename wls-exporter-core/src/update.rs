//! Timestamped configuration updates exchanged between exporter instances.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// A full configuration document stamped with the time it was installed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigurationUpdate {
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    /// The configuration document, as accepted by [`crate::ExporterConfig::parse`].
    pub configuration: String,
}

impl ConfigurationUpdate {
    pub fn new(timestamp: i64, configuration: impl Into<String>) -> Self {
        Self {
            timestamp,
            configuration: configuration.into(),
        }
    }
}

/// Get the current timestamp in milliseconds since Unix epoch.
pub fn current_timestamp_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
