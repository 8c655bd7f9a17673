//! Configuration sharing between exporter instances through a sync service.
//!
//! The service stores the latest [`ConfigurationUpdate`]: `GET` returns it and
//! `PUT` replaces it. Each exporter polls it and installs newer updates.

use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use reqwest::header::CONTENT_TYPE;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use wls_exporter_core::{ConfigurationUpdate, LiveConfiguration, QuerySyncConfig};

use crate::client::ClientError;
use crate::diagnostics::{Diagnostics, SharedDiagnostics};

/// Client for the sync service.
///
/// Failed polls and rejected updates are added to the error log.
#[derive(Debug, Clone)]
pub struct QuerySyncClient {
    http: reqwest::Client,
    url: String,
    interval: Duration,
    diagnostics: SharedDiagnostics,
}

impl QuerySyncClient {
    pub fn new(config: &QuerySyncConfig, timeout: Duration) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(ClientError::Build)?;
        Ok(Self {
            http,
            url: config.url.clone(),
            interval: Duration::from_secs(config.interval_secs.max(1)),
            diagnostics: Arc::new(Diagnostics::default()),
        })
    }

    /// Record failures into a shared log.
    pub fn with_diagnostics(mut self, diagnostics: SharedDiagnostics) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    pub fn diagnostics(&self) -> &SharedDiagnostics {
        &self.diagnostics
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Fetch the latest shared update, if the service holds one.
    pub async fn fetch(&self) -> Result<Option<ConfigurationUpdate>, ClientError> {
        let response = self
            .http
            .get(&self.url)
            .send()
            .await
            .map_err(|source| self.connection_error(source))?;

        match response.status() {
            StatusCode::NO_CONTENT | StatusCode::NOT_FOUND => return Ok(None),
            s if s.is_success() => {}
            other => {
                return Err(ClientError::Status {
                    url: self.url.clone(),
                    status: other.as_u16(),
                });
            }
        }

        let body = response
            .text()
            .await
            .map_err(|source| self.connection_error(source))?;
        if body.trim().is_empty() {
            return Ok(None);
        }

        serde_json::from_str(&body)
            .map(Some)
            .map_err(|source| ClientError::InvalidJson {
                url: self.url.clone(),
                source,
            })
    }

    /// Publish an update to the service.
    pub async fn share(&self, update: &ConfigurationUpdate) -> Result<(), ClientError> {
        let body = serde_json::to_string(update).map_err(|source| ClientError::InvalidJson {
            url: self.url.clone(),
            source,
        })?;

        let response = self
            .http
            .put(&self.url)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|source| self.connection_error(source))?;

        if !response.status().is_success() {
            return Err(ClientError::Status {
                url: self.url.clone(),
                status: response.status().as_u16(),
            });
        }

        debug!(timestamp = update.timestamp, url = %self.url, "Shared configuration update");
        Ok(())
    }

    /// Fetch once and install the result if it is newer than the live configuration.
    pub async fn poll_once(&self, live: &LiveConfiguration) -> Result<bool, ClientError> {
        let Some(update) = self.fetch().await? else {
            return Ok(false);
        };

        match live.apply_update(&update) {
            Ok(installed) => Ok(installed),
            Err(e) => {
                warn!(error = %e, timestamp = update.timestamp, "Ignoring invalid shared configuration");
                self.diagnostics
                    .record_error(format!("Ignoring shared configuration: {}", e));
                Ok(false)
            }
        }
    }

    /// Poll the service until the shutdown signal is received.
    pub async fn run(self, live: Arc<LiveConfiguration>, mut shutdown: watch::Receiver<bool>) {
        info!(url = %self.url, interval_secs = self.interval.as_secs(), "Starting configuration sync");
        let mut interval = tokio::time::interval(self.interval);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.poll_once(&live).await {
                        warn!(error = %e, "Configuration sync failed");
                        self.diagnostics.record_error(format!("Configuration sync failed: {}", e));
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Configuration sync stopped");
    }

    fn connection_error(&self, source: reqwest::Error) -> ClientError {
        ClientError::Connection {
            url: self.url.clone(),
            source,
        }
    }
}
