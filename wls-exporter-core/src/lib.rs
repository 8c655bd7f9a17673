//! WebLogic Exporter Core Library
//!
//! This crate turns a declarative description of management API fields into
//! search requests, and turns the JSON responses into metrics:
//!
//! - [`selector`] - The selector tree and its merge rules
//! - [`query`] - Query documents sent to the search endpoints
//! - [`keys`] - Keys accepted by key patterns, cached between scrapes
//! - [`scraper`] - The depth-first scrape of a JSON response
//! - [`classification`] - Runtime and configuration request classification
//! - [`config`] - The exporter configuration (JSON5 format)
//! - [`live`] - The shared, atomically swapped configuration handle
//! - [`update`] - Timestamped configuration updates
//! - [`metrics`] - Metric values and line formatting
//! - [`error`] - Error types

pub mod classification;
pub mod config;
pub mod error;
pub mod keys;
pub mod live;
pub mod metrics;
pub mod naming;
pub mod query;
pub mod scraper;
pub mod selector;
pub mod update;

// Re-export commonly used types at the crate root
pub use classification::{Protocol, QueryType};
pub use config::{ExporterConfig, LogFormat, LoggingConfig, QuerySyncConfig};
pub use error::{ConfigError, Result};
pub use keys::{KEY_UPDATE_INTERVAL, KeyCache, SelectedKeys};
pub use live::LiveConfiguration;
pub use metrics::{MetricValue, MetricsMap, format_metric_lines};
pub use naming::{escape_label_value, format_labels, snake_case};
pub use query::{FORBIDDEN_FIELDS, QueryDocument};
pub use scraper::{MetricsScraper, RawValue, ScrapedMetric};
pub use selector::{KeyPattern, Selector};
pub use update::{ConfigurationUpdate, current_timestamp_millis};

/// Error returned when the global tracing subscriber cannot be installed.
#[derive(Debug, thiserror::Error)]
#[error("Failed to initialize tracing: {0}")]
pub struct TracingError(#[from] tracing_subscriber::util::TryInitError);

/// Initialize tracing with the given configuration.
///
/// Supports two output formats:
/// - `LogFormat::Text` (default): Human-readable text format
/// - `LogFormat::Json`: Structured JSON format for log aggregation systems
///
/// The `RUST_LOG` environment variable overrides the configured level.
///
/// # Example
///
/// ```ignore
/// use wls_exporter_core::{LoggingConfig, LogFormat, init_tracing};
///
/// let config = LoggingConfig {
///     level: "info".to_string(),
///     format: LogFormat::Json,
/// };
/// init_tracing(&config)?;
/// ```
pub fn init_tracing(config: &LoggingConfig) -> std::result::Result<(), TracingError> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    match config.format {
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(fmt::layer())
                .with(filter)
                .try_init()?;
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(fmt::layer().json())
                .with(filter)
                .try_init()?;
        }
    }

    Ok(())
}
