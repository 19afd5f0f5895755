//! Intersection Signal Engine - Main Entry Point

use anyhow::Context;
use api::{config::AppConfig, create_router, init_logging, AppState};
use audit_log::{spawn_recorder, AuditLog};
use metrics_exporter_prometheus::PrometheusBuilder;
use signal_coordinator::{SignalEngine, SystemClock};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load().context("Failed to load configuration")?;
    init_logging(&config.logging).context("Failed to set tracing subscriber")?;

    info!("=== Intersection Signal Engine v{} ===", env!("CARGO_PKG_VERSION"));

    let metrics = match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!("Prometheus recorder unavailable: {}", e);
            None
        }
    };

    let engine = SignalEngine::new(config.engine.clone(), Arc::new(SystemClock))
        .context("Failed to create signal engine")?;
    engine.start();

    let audit = Arc::new(AuditLog::new());
    let recorder = spawn_recorder(audit.clone(), engine.subscribe_override_events());

    let state = Arc::new(AppState::new(engine.clone(), audit, metrics));
    let app = create_router(state, &config.server.rate_limit)?;

    info!("Starting API server on {}", config.server.bind_addr);
    let listener = tokio::net::TcpListener::bind(&config.server.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind_addr))?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("API server failed")?;

    engine.shutdown().await;
    recorder.abort();
    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
