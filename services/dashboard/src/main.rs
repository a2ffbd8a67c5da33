use anyhow::{Context, Result};
use dashboard_service::{
    start_api_server, AppState, Config, DynamoStore, GeminiAnalyzer, HrvTable, MongoDocumentStore,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service.log_level);

    info!(
        service = %config.service.name,
        "Starting Health Dashboard Service"
    );

    // Initialize metrics
    init_metrics(config.service.metrics_port)?;

    if config.document_store.uri.is_none() {
        warn!("Document store URI not set; document endpoints will fail until configured");
    }
    if config.inference.api_key.is_none() {
        warn!("Inference API key not set; image analysis will fail until configured");
    }

    // Initialize components
    let documents = Arc::new(MongoDocumentStore::new(&config.document_store));
    let key_value = Arc::new(DynamoStore::new(&config.key_value).await);
    let analyzer = Arc::new(
        GeminiAnalyzer::new(&config.inference).context("Failed to initialize image analyzer")?,
    );

    info!(
        timeout = ?config.inference_timeout(),
        model = %config.inference.model,
        "Image analyzer ready"
    );

    // Create API state
    let api_state = AppState {
        documents,
        key_value,
        analyzer,
        hrv_table: HrvTable {
            name: config.key_value.table.clone(),
            partition_key: config.key_value.partition_key.clone(),
            sort_key: config.key_value.sort_key.clone(),
        },
        ingestion_source: PathBuf::from(&config.ingestion.source_path),
    };

    // Spawn API server task
    let api_config = config.api.clone();
    let api_handle = tokio::spawn(async move {
        if let Err(e) = start_api_server(api_state, &api_config).await {
            error!(error = %e, "API server error");
        }
    });

    info!("Dashboard service started successfully");

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutting down dashboard service");

    api_handle.abort();

    info!("Dashboard service stopped");

    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json())
        .init();
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = port, "Prometheus metrics exporter started");

    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
