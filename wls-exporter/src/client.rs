//! HTTP client for the management API search endpoints.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, WWW_AUTHENTICATE};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, trace};
use wls_exporter_core::QueryDocument;

use crate::diagnostics::{Diagnostics, SharedDiagnostics};

/// Header the management API requires on every modifying request.
pub const REQUESTED_BY_HEADER: &str = "X-Requested-By";
const REQUESTED_BY: &str = "wls-exporter";

/// Failures talking to the management API or the sync service.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Authentication required")]
    Unauthorized { challenge: Option<String> },

    #[error("Not authorized to read the management API")]
    Forbidden,

    #[error("Query rejected by {url}")]
    BadRequest { url: String },

    #[error("Unable to contact {url}: {source}")]
    Connection {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Unexpected status {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("Invalid JSON from {url}: {source}")]
    InvalidJson {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to build HTTP client: {0}")]
    Build(#[source] reqwest::Error),
}

/// Posts query documents to the search endpoints.
///
/// Every exchange is recorded in the client's [`Diagnostics`].
#[derive(Debug, Clone)]
pub struct RestClient {
    http: reqwest::Client,
    diagnostics: SharedDiagnostics,
}

impl RestClient {
    /// Create a client whose requests give up after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(ClientError::Build)?;
        Ok(Self {
            http,
            diagnostics: Arc::new(Diagnostics::default()),
        })
    }

    /// Record exchanges into a shared log.
    pub fn with_diagnostics(mut self, diagnostics: SharedDiagnostics) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    pub fn diagnostics(&self) -> &SharedDiagnostics {
        &self.diagnostics
    }

    /// Run a search, forwarding the caller's credentials.
    ///
    /// Returns `None` when the server answers with an empty body.
    pub async fn search(
        &self,
        url: &str,
        query: &QueryDocument,
        authorization: Option<&str>,
    ) -> Result<Option<Value>, ClientError> {
        let body = query.to_request();
        let requested_at = Utc::now();
        let result = self.post(url, &body, authorization).await;
        let reply = match &result {
            Ok(text) => text.clone(),
            Err(e) => e.to_string(),
        };
        self.diagnostics.record_exchange(url, &body, requested_at, reply);

        let text = result?;
        if text.trim().is_empty() {
            debug!(url, "Empty response from management API");
            return Ok(None);
        }

        serde_json::from_str(&text)
            .map(Some)
            .map_err(|source| ClientError::InvalidJson {
                url: url.to_string(),
                source,
            })
    }

    async fn post(
        &self,
        url: &str,
        body: &str,
        authorization: Option<&str>,
    ) -> Result<String, ClientError> {
        let mut request = self
            .http
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json")
            .header(REQUESTED_BY_HEADER, REQUESTED_BY)
            .body(body.to_string());
        if let Some(credentials) = authorization {
            request = request.header(AUTHORIZATION, credentials);
        }

        trace!(url, "Posting management API query");
        let response = request.send().await.map_err(|source| ClientError::Connection {
            url: url.to_string(),
            source,
        })?;

        let status = response.status();
        match status {
            s if s.is_success() => {}
            StatusCode::BAD_REQUEST => {
                return Err(ClientError::BadRequest {
                    url: url.to_string(),
                });
            }
            StatusCode::UNAUTHORIZED => {
                let challenge = response
                    .headers()
                    .get(WWW_AUTHENTICATE)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                return Err(ClientError::Unauthorized { challenge });
            }
            StatusCode::FORBIDDEN => return Err(ClientError::Forbidden),
            other => {
                return Err(ClientError::Status {
                    url: url.to_string(),
                    status: other.as_u16(),
                });
            }
        }

        response.text().await.map_err(|source| ClientError::Connection {
            url: url.to_string(),
            source,
        })
    }
}
