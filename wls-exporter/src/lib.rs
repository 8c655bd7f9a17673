//! Prometheus exporter for the WebLogic Management REST API.
//!
//! On every scrape the exporter turns its configured selectors into search
//! requests, posts them to the management API of one server, and renders the
//! responses as Prometheus text.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌─────────────────┐
//! │ Management API  │<────│    Collector    │<────│   HTTP Server   │
//! │ (search, JSON)  │     │ (live config)   │     │ (/metrics, ...) │
//! └─────────────────┘     └─────────────────┘     └─────────────────┘
//!                                  ^
//!                                  │ timestamped updates
//!                         ┌─────────────────┐
//!                         │  Sync service   │
//!                         └─────────────────┘
//! ```
//!
//! # Usage
//!
//! ```bash
//! wls-exporter --config settings.json5 --queries queries.json5
//! ```
//!
//! # Configuration
//!
//! See [`settings::ExporterSettings`] for process settings and
//! [`wls_exporter_core::ExporterConfig`] for the queries document.

pub mod client;
pub mod collector;
pub mod diagnostics;
pub mod http;
pub mod settings;
pub mod sync;

pub use client::{ClientError, RestClient};
pub use collector::{MetricCollector, SharedCollector};
pub use diagnostics::{Diagnostics, SharedDiagnostics};
pub use http::HttpServer;
pub use settings::{ExporterSettings, SettingsError};
pub use sync::QuerySyncClient;
