//! Runtime settings of the exporter process.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use wls_exporter_core::{LoggingConfig, Protocol};

/// Settings file errors.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Failed to read settings file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse settings: {0}")]
    Parse(#[from] json5::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Complete exporter settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExporterSettings {
    /// HTTP endpoint settings.
    #[serde(default)]
    pub server: ServerSettings,

    /// The WebLogic server whose management API is queried.
    #[serde(default)]
    pub target: TargetSettings,

    /// Queries document loaded at startup.
    #[serde(default)]
    pub queries: Option<PathBuf>,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Address to listen on (default: "0.0.0.0:8080").
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Path for metrics endpoint (default: "/metrics").
    #[serde(default = "default_metrics_path")]
    pub metrics_path: String,
}

fn default_listen() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            metrics_path: default_metrics_path(),
        }
    }
}

/// Management API location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetSettings {
    /// Host name of the server (default: "localhost").
    #[serde(default = "default_host")]
    pub host: String,

    /// Port of the server (default: 7001). A `restPort` in the queries
    /// document takes precedence for management API requests.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Use HTTPS.
    #[serde(default)]
    pub secure: bool,

    /// Timeout for each management API request (seconds).
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    7001
}

fn default_request_timeout() -> u64 {
    30
}

impl Default for TargetSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            secure: false,
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl TargetSettings {
    pub fn protocol(&self) -> Protocol {
        Protocol::from_secure(self.secure)
    }

    /// `host:port`, as used in the self-metrics `instance` label.
    pub fn instance(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl ExporterSettings {
    /// Load settings from a JSON5 file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, SettingsError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse settings from a JSON5 string.
    pub fn parse(content: &str) -> Result<Self, SettingsError> {
        let settings: ExporterSettings = json5::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validate the settings.
    pub fn validate(&self) -> Result<(), SettingsError> {
        self.listen_addr()?;

        if !self.server.metrics_path.starts_with('/') {
            return Err(SettingsError::Validation(
                "Metrics path must start with /".to_string(),
            ));
        }

        if self.target.host.trim().is_empty() {
            return Err(SettingsError::Validation(
                "Target host must not be empty".to_string(),
            ));
        }

        if self.target.port == 0 {
            return Err(SettingsError::Validation(
                "Target port must be > 0".to_string(),
            ));
        }

        if self.target.request_timeout_secs == 0 {
            return Err(SettingsError::Validation(
                "request_timeout_secs must be > 0".to_string(),
            ));
        }

        Ok(())
    }

    /// The parsed listen address.
    pub fn listen_addr(&self) -> Result<SocketAddr, SettingsError> {
        self.server.listen.parse().map_err(|_| {
            SettingsError::Validation(format!("Invalid listen address: {}", self.server.listen))
        })
    }
}
