//! WebLogic Management REST API exporter.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info};

use wls_exporter::{
    Diagnostics, ExporterSettings, HttpServer, MetricCollector, QuerySyncClient, RestClient,
};
use wls_exporter_core::{ExporterConfig, LiveConfiguration, init_tracing};

/// Prometheus exporter for the WebLogic Management REST API.
#[derive(Parser, Debug)]
#[command(name = "wls-exporter")]
#[command(about = "Export WebLogic Management REST API data as Prometheus metrics")]
#[command(version)]
struct Args {
    /// Path to settings file (JSON5 format).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Path to queries document (overrides settings).
    #[arg(short, long)]
    queries: Option<PathBuf>,

    /// HTTP listen address (overrides settings).
    #[arg(long)]
    listen: Option<String>,

    /// Log level (trace, debug, info, warn, error; overrides settings).
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load settings
    let mut settings = match &args.config {
        Some(path) => ExporterSettings::load_from_file(path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?,
        None => ExporterSettings::default(),
    };

    if let Some(listen) = args.listen {
        settings.server.listen = listen;
    }
    if let Some(level) = args.log_level {
        settings.logging.level = level;
    }
    if let Some(queries) = args.queries {
        settings.queries = Some(queries);
    }
    settings.validate()?;

    init_tracing(&settings.logging)?;

    info!("Starting WebLogic Exporter");

    let config = match &settings.queries {
        Some(path) => ExporterConfig::load_from_file(path)
            .with_context(|| format!("Failed to load queries from {}", path.display()))?,
        None => ExporterConfig::default(),
    };
    info!(queries = config.queries().len(), "Loaded configuration");

    let timeout = Duration::from_secs(settings.target.request_timeout_secs);
    let diagnostics = Arc::new(Diagnostics::default());
    let sync = config
        .query_sync()
        .map(|sync| QuerySyncClient::new(sync, timeout))
        .transpose()?
        .map(|sync| Arc::new(sync.with_diagnostics(diagnostics.clone())));

    let live = Arc::new(LiveConfiguration::new(config));
    let client = RestClient::new(timeout)?.with_diagnostics(diagnostics);
    let collector = Arc::new(MetricCollector::new(
        live.clone(),
        client,
        &settings.target,
    ));

    // Create shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let sync_task = sync.clone().map(|sync| {
        let live = live.clone();
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move { QuerySyncClient::clone(&sync).run(live, shutdown).await })
    });

    let http_server = HttpServer::new(
        collector,
        sync,
        settings.listen_addr()?,
        settings.server.metrics_path.clone(),
    );
    let http_shutdown = shutdown_rx.clone();
    let http_task = tokio::spawn(async move {
        if let Err(e) = http_server.run(http_shutdown).await {
            error!("HTTP server error: {}", e);
        }
    });

    // Wait for shutdown signal
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = terminate() => {
            info!("Received SIGTERM, shutting down...");
        }
    }

    // Signal shutdown
    shutdown_tx.send(true)?;

    // Wait for tasks to complete
    let _ = tokio::time::timeout(Duration::from_secs(5), async {
        let _ = http_task.await;
        if let Some(task) = sync_task {
            let _ = task.await;
        }
    })
    .await;

    info!("Exporter stopped");
    Ok(())
}

#[cfg(unix)]
async fn terminate() {
    match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            error!("Failed to install SIGTERM handler: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}
