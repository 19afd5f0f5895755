//! Intersection Signal API Server
//!
//! REST API and WebSocket server for the signal operations dashboard.

use axum::{
    extract::State,
    http::header,
    response::IntoResponse,
    routing::{delete, get, post, put},
    Json, Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use std::sync::Arc;
use tower_governor::GovernorLayer;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::subscriber::SetGlobalDefaultError;
use tracing_subscriber::FmtSubscriber;

pub mod config;
pub mod error;
pub mod rate_limit;
mod routes;

use audit_log::AuditLog;
use config::LoggingConfig;
use error::ApiError;
use rate_limit::{create_governor_config, RateLimitConfig};
use routes::{live, locations, overrides, samples};
use signal_coordinator::SignalEngine;

/// Application state shared across handlers
pub struct AppState {
    pub engine: SignalEngine,
    pub audit: Arc<AuditLog>,
    /// Prometheus renderer, when a recorder is installed
    pub metrics: Option<PrometheusHandle>,
    pub version: String,
    pub start_time: std::time::Instant,
}

impl AppState {
    pub fn new(engine: SignalEngine, audit: Arc<AuditLog>, metrics: Option<PrometheusHandle>) -> Self {
        Self {
            engine,
            audit,
            metrics,
            version: env!("CARGO_PKG_VERSION").to_string(),
            start_time: std::time::Instant::now(),
        }
    }
}

/// Health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: i64,
    pub version: String,
    pub uptime_seconds: u64,
    pub metrics: EngineMetrics,
}

#[derive(Debug, Serialize)]
pub struct EngineMetrics {
    pub locations: usize,
    pub active_locations: usize,
    pub active_overrides: usize,
    pub live_subscribers: usize,
    pub audit_records: usize,
}

/// Create the application router
pub fn create_router(state: Arc<AppState>, rate_limit: &RateLimitConfig) -> Result<Router, ApiError> {
    let governor = create_governor_config(rate_limit)?;

    let control = Router::new()
        .route(
            "/api/v1/locations/:id/manual",
            put(locations::set_manual).delete(locations::clear_manual),
        )
        .route("/api/v1/locations/:id", delete(locations::deactivate))
        .route("/api/v1/overrides/:id/clear", post(overrides::clear))
        .layer(GovernorLayer { config: governor });

    Ok(Router::new()
        .route("/api/v1/health", get(health_handler))
        .route("/api/v1/locations", get(locations::list_locations))
        .route("/api/v1/locations/:id/state", get(locations::get_state))
        .route("/api/v1/samples", post(samples::post_sample))
        .route("/api/v1/overrides", get(overrides::list_active))
        .route("/api/v1/overrides/history", get(overrides::history))
        .route("/api/v1/audit/:record_id", get(overrides::audit_record))
        .route("/ws/live", get(live::ws_handler))
        .route("/metrics", get(metrics_handler))
        .merge(control)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state))
}

/// Health check handler
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let states = state.engine.states();

    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: chrono::Utc::now().timestamp(),
        version: state.version.clone(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        metrics: EngineMetrics {
            locations: states.len(),
            active_locations: states.iter().filter(|s| s.active).count(),
            active_overrides: state.engine.active_overrides().len(),
            live_subscribers: state.engine.subscriber_count(),
            audit_records: state.audit.len(),
        },
    })
}

/// Prometheus text exposition
async fn metrics_handler(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    let handle = state
        .metrics
        .as_ref()
        .ok_or_else(|| ApiError::Unavailable("metrics recorder not installed".to_string()))?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        handle.render(),
    ))
}

/// Initialize logging
pub fn init_logging(config: &LoggingConfig) -> Result<(), SetGlobalDefaultError> {
    let builder = FmtSubscriber::builder()
        .with_max_level(config.level())
        .with_target(true);

    if config.json {
        tracing::subscriber::set_global_default(builder.json().finish())
    } else {
        tracing::subscriber::set_global_default(builder.finish())
    }
}
