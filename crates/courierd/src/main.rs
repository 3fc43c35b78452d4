//! courierd - resilient request delivery daemon
//!
//! Accepts requests over HTTP, delivers them upstream when online and
//! parks them in a persisted queue while offline. Connectivity transitions
//! are reported by the host through `POST /v1/connectivity`.

use anyhow::{Context, Result};
use courier_lib::{
    connectivity::{ConnectivityMonitor, ManualConnectivity},
    health::{components, HealthRegistry},
    queue::{FileStorage, MemoryStorage, Storage},
    sync::StaticToken,
    CourierMetrics, RequestClient,
};
use courierd::{api, config::DaemonConfig};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const DAEMON_VERSION: &str = env!("CARGO_PKG_VERSION");

/// How often health is re-derived and expired cache entries are dropped
const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting courierd");

    let config = DaemonConfig::load()?;
    info!(
        instance = %config.instance,
        api_base_url = ?config.api_base_url,
        data_dir = ?config.data_dir,
        "Daemon configured"
    );

    let metrics = CourierMetrics::new();

    let storage: Arc<dyn Storage> = match &config.data_dir {
        Some(dir) => Arc::new(FileStorage::new(dir.clone())),
        None => Arc::new(MemoryStorage::new()),
    };

    let source = Arc::new(ManualConnectivity::new(config.start_online));
    let connectivity = ConnectivityMonitor::from_source(source.as_ref());

    let mut builder = RequestClient::builder()
        .config(config.client_config())
        .storage(storage)
        .connectivity(connectivity)
        .metrics(metrics.clone());
    if let Some(token) = &config.bearer_token {
        builder = builder.token_provider(Arc::new(StaticToken::new(token.clone())));
    }
    let client = Arc::new(builder.build().context("Failed to build request client")?);

    let queued = client.get_queue_status().queue.length;
    client
        .logger()
        .log_startup(DAEMON_VERSION, queued, client.is_online());

    let health_registry = HealthRegistry::new();
    for name in components::ALL {
        health_registry.register(name).await;
    }
    health_registry.refresh(&client).await;

    let app_state = Arc::new(api::AppState::new(
        client.clone(),
        source,
        health_registry.clone(),
        metrics,
    ));

    // Deliver whatever survived the last run
    if client.is_online() && queued > 0 {
        let client = client.clone();
        tokio::spawn(async move {
            if let Some(summary) = client.sync_now().await {
                info!(
                    success = summary.success,
                    failure = summary.failure,
                    "Startup drain finished"
                );
            }
        });
    }

    let maintenance = {
        let client = client.clone();
        let health_registry = health_registry.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(MAINTENANCE_INTERVAL);
            loop {
                interval.tick().await;
                let purged = client.purge_expired_cache();
                if purged > 0 {
                    debug!(purged, "Purged expired cache entries");
                }
                health_registry.refresh(&client).await;
            }
        })
    };

    health_registry.set_ready(true).await;

    let api_handle = tokio::spawn(api::serve(config.listen_port, app_state));

    // Wait for shutdown signal
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for shutdown signal")?;
            client
                .logger()
                .log_shutdown("SIGINT received", client.get_queue_status().queue.length);
        }
        result = api_handle => {
            result.context("API server task panicked")??;
        }
    }

    client.engine().stop();
    maintenance.abort();
    info!("Shutting down");

    Ok(())
}
