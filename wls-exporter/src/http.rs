//! HTTP server for the metrics and configuration endpoints.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::http::header::{AUTHORIZATION, WWW_AUTHENTICATE};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use wls_exporter_core::ConfigurationUpdate;

use crate::client::ClientError;
use crate::collector::SharedCollector;
use crate::sync::QuerySyncClient;

/// Path of the configuration endpoint.
pub const CONFIGURATION_PATH: &str = "/configuration";

/// Path of the recent management API exchanges.
pub const MESSAGES_PATH: &str = "/messages";

/// Path of the error log.
pub const LOG_PATH: &str = "/log";

const DEFAULT_CHALLENGE: &str = "Basic realm=\"WebLogic Server\"";

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    collector: SharedCollector,
    sync: Option<Arc<QuerySyncClient>>,
}

/// Create the HTTP router.
fn create_router(
    collector: SharedCollector,
    sync: Option<Arc<QuerySyncClient>>,
    metrics_path: &str,
) -> Router {
    let state = AppState { collector, sync };

    Router::new()
        .route(metrics_path, get(metrics_handler))
        .route(
            CONFIGURATION_PATH,
            get(show_configuration_handler)
                .put(replace_configuration_handler)
                .post(append_configuration_handler),
        )
        .route(MESSAGES_PATH, get(messages_handler))
        .route(LOG_PATH, get(log_handler))
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Handler for the metrics endpoint.
async fn metrics_handler(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let authorization = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok());

    match state.collector.collect(authorization).await {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(ClientError::Unauthorized { challenge }) => {
            let challenge = challenge.unwrap_or_else(|| DEFAULT_CHALLENGE.to_string());
            (
                StatusCode::UNAUTHORIZED,
                [(WWW_AUTHENTICATE, challenge)],
                "Authentication required\n",
            )
                .into_response()
        }
        Err(ClientError::Forbidden) => {
            (StatusCode::FORBIDDEN, "Not authorized to read metrics\n").into_response()
        }
        Err(e) => {
            error!(error = %e, "Scrape failed");
            (StatusCode::INTERNAL_SERVER_ERROR, format!("{}\n", e)).into_response()
        }
    }
}

/// Handler for `GET /configuration`.
async fn show_configuration_handler(State(state): State<AppState>) -> Response {
    let config = state.collector.live().snapshot();
    (StatusCode::OK, format!("{}\n", config)).into_response()
}

/// Handler for `PUT /configuration`: replace the queries.
///
/// Uploads change the queries and scrape settings only. A `query_sync` block
/// in an upload is ignored: the sync service in use is the one named by the
/// startup queries document.
async fn replace_configuration_handler(State(state): State<AppState>, body: String) -> Response {
    let result = state.collector.live().replace(&body);
    configuration_changed(state, result).await
}

/// Handler for `POST /configuration`: append queries. As with a replace, a
/// `query_sync` block in the upload is ignored.
async fn append_configuration_handler(State(state): State<AppState>, body: String) -> Response {
    let result = state.collector.live().append(&body);
    configuration_changed(state, result).await
}

async fn configuration_changed(
    state: AppState,
    result: wls_exporter_core::Result<ConfigurationUpdate>,
) -> Response {
    let update = match result {
        Ok(update) => update,
        Err(e) => {
            warn!(error = %e, "Rejected configuration");
            return (StatusCode::BAD_REQUEST, format!("{}\n", e)).into_response();
        }
    };

    if let Some(sync) = &state.sync {
        if let Err(e) = sync.share(&update).await {
            warn!(error = %e, url = %sync.url(), "Failed to share configuration");
            state
                .collector
                .diagnostics()
                .record_error(format!("Failed to share configuration: {}", e));
        }
    }

    (StatusCode::OK, format!("{}\n", update.configuration)).into_response()
}

/// Handler for `GET /messages`: the most recent management API exchanges.
async fn messages_handler(State(state): State<AppState>) -> Response {
    (StatusCode::OK, state.collector.diagnostics().render_exchanges()).into_response()
}

/// Handler for `GET /log`: errors reported by scrapes and the sync service.
async fn log_handler(State(state): State<AppState>) -> Response {
    (StatusCode::OK, state.collector.diagnostics().render_errors()).into_response()
}

/// Handler for the /health endpoint.
async fn health_handler() -> Response {
    (StatusCode::OK, "healthy\n").into_response()
}

/// HTTP server configuration.
pub struct HttpServer {
    collector: SharedCollector,
    sync: Option<Arc<QuerySyncClient>>,
    listen_addr: SocketAddr,
    metrics_path: String,
}

impl HttpServer {
    /// Create a new HTTP server.
    pub fn new(
        collector: SharedCollector,
        sync: Option<Arc<QuerySyncClient>>,
        listen_addr: SocketAddr,
        metrics_path: String,
    ) -> Self {
        Self {
            collector,
            sync,
            listen_addr,
            metrics_path,
        }
    }

    /// Bind the listen address and run until the shutdown signal is received.
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.listen_addr)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind to {}: {}", self.listen_addr, e))?;
        self.serve(listener, shutdown).await
    }

    /// Run on an already bound listener until the shutdown signal is received.
    pub async fn serve(
        self,
        listener: tokio::net::TcpListener,
        mut shutdown: watch::Receiver<bool>,
    ) -> anyhow::Result<()> {
        let router = create_router(self.collector, self.sync, &self.metrics_path);

        info!(
            addr = ?listener.local_addr().ok(),
            path = %self.metrics_path,
            "HTTP server listening"
        );

        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                loop {
                    if shutdown.changed().await.is_err() {
                        break;
                    }
                    if *shutdown.borrow() {
                        break;
                    }
                }
                info!("HTTP server shutting down");
            })
            .await
            .map_err(|e| anyhow::anyhow!("HTTP server error: {}", e))?;

        info!("HTTP server stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::RestClient;
    use crate::collector::{MetricCollector, NO_CONFIGURATION};
    use crate::diagnostics::NO_ERRORS;
    use crate::settings::TargetSettings;
    use axum::body::Body;
    use axum::http::Request;
    use std::time::Duration;
    use tower::ServiceExt;
    use wls_exporter_core::LiveConfiguration;

    const QUERIES: &str = "{ queries: [{ JVMRuntime: { key: 'name', values: ['heapFreeCurrent'] } }] }";

    fn make_collector() -> SharedCollector {
        Arc::new(MetricCollector::new(
            Arc::new(LiveConfiguration::default()),
            RestClient::new(Duration::from_secs(1)).unwrap(),
            &TargetSettings::default(),
        ))
    }

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_metrics_endpoint_without_configuration() {
        let router = create_router(make_collector(), None, "/metrics");

        let response = router
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response.headers().get("content-type").unwrap();
        assert!(content_type.to_str().unwrap().contains("text/plain"));
        assert_eq!(body_text(response).await, NO_CONFIGURATION);
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let router = create_router(make_collector(), None, "/metrics");

        let response = router
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "healthy\n");
    }

    #[tokio::test]
    async fn test_replace_and_show_configuration() {
        let collector = make_collector();
        let router = create_router(collector.clone(), None, "/metrics");

        let response = router
            .clone()
            .oneshot(
                Request::put(CONFIGURATION_PATH)
                    .body(Body::from(QUERIES))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(collector.live().snapshot().queries().len(), 1);

        let response = router
            .oneshot(Request::get(CONFIGURATION_PATH).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_text(response).await.contains("heapFreeCurrent"));
    }

    #[tokio::test]
    async fn test_append_configuration() {
        let collector = make_collector();
        collector.live().replace(QUERIES).unwrap();
        let router = create_router(collector.clone(), None, "/metrics");

        let response = router
            .oneshot(
                Request::post(CONFIGURATION_PATH)
                    .body(Body::from(
                        "{ queries: [{ JVMRuntime: { key: 'name', values: ['heapSizeCurrent'] } }] }",
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let config = collector.live().snapshot();
        assert_eq!(config.queries().len(), 1);
        assert_eq!(
            config.queries()[0].child("JVMRuntime").unwrap().values(),
            ["heapFreeCurrent", "heapSizeCurrent"]
        );
    }

    #[tokio::test]
    async fn test_invalid_configuration_rejected() {
        let collector = make_collector();
        collector.live().replace(QUERIES).unwrap();
        let router = create_router(collector.clone(), None, "/metrics");

        let response = router
            .oneshot(
                Request::put(CONFIGURATION_PATH)
                    .body(Body::from("{ queries: [{ servlets: { values: [] } }] }"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            body_text(response).await,
            "Values specified as empty array at servlets\n"
        );
        assert!(
            collector.live().snapshot().queries()[0]
                .child("JVMRuntime")
                .is_some()
        );
    }

    #[tokio::test]
    async fn test_uploaded_query_sync_is_not_adopted() {
        let collector = make_collector();
        let router = create_router(collector.clone(), None, "/metrics");

        let response = router
            .oneshot(
                Request::put(CONFIGURATION_PATH)
                    .body(Body::from(
                        "{ query_sync: { url: 'http://sync:8999/' }, queries: [{ JVMRuntime: { values: ['a'] } }] }",
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let config = collector.live().snapshot();
        assert_eq!(config.queries().len(), 1);
        assert!(config.query_sync().is_none());
    }

    #[tokio::test]
    async fn test_messages_endpoint_lists_exchanges() {
        let collector = make_collector();
        collector.diagnostics().record_exchange(
            "http://localhost:7001/search",
            "{\"links\":[]}",
            chrono::Utc::now(),
            "{\"name\":\"ms1\"}",
        );
        let router = create_router(collector, None, "/metrics");

        let response = router
            .oneshot(Request::get(MESSAGES_PATH).body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_text(response).await;
        assert!(body.contains("REQUEST to http://localhost:7001/search:\n{\"links\":[]}\n"));
        assert!(body.contains("{\"name\":\"ms1\"}"));
    }

    #[tokio::test]
    async fn test_log_endpoint() {
        let collector = make_collector();
        let router = create_router(collector.clone(), None, "/metrics");

        let response = router
            .clone()
            .oneshot(Request::get(LOG_PATH).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(body_text(response).await, NO_ERRORS);

        collector
            .diagnostics()
            .record_error("Configuration sync failed: Unexpected status 500 from http://sync/");
        let response = router
            .oneshot(Request::get(LOG_PATH).body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_text(response).await.ends_with("Unexpected status 500 from http://sync/\n"));
    }

    #[tokio::test]
    async fn test_custom_metrics_path() {
        let router = create_router(make_collector(), None, "/wls/metrics");

        let response = router
            .clone()
            .oneshot(Request::get("/wls/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = router
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
