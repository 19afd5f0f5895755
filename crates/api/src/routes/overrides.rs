//! Emergency override routes

use audit_log::{AuditQuery, AuditRecord};
use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use signal_coordinator::ClearOutcome;
use std::sync::Arc;
use traffic_model::{EmergencyOverride, LocationId};
use uuid::Uuid;

use crate::{error::ApiError, AppState};

#[derive(Debug, Serialize)]
pub struct ActiveOverridesResponse {
    pub data: Vec<EmergencyOverride>,
    pub count: usize,
}

/// Query parameters for override history
#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub location: Option<String>,
    /// Include created and refreshed events, not only terminal ones
    #[serde(default)]
    pub all_events: bool,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    50
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub data: Vec<AuditRecord>,
    pub count: usize,
    pub limit: usize,
}

#[derive(Debug, Serialize)]
pub struct ClearResponse {
    pub override_id: Uuid,
    pub outcome: &'static str,
    /// The override as cleared; absent when it had already ended
    pub record: Option<EmergencyOverride>,
}

/// Overrides currently holding a green
pub async fn list_active(State(state): State<Arc<AppState>>) -> Json<ActiveOverridesResponse> {
    let data = state.engine.active_overrides();
    Json(ActiveOverridesResponse {
        count: data.len(),
        data,
    })
}

/// Audit trail of override lifecycle events, newest first
pub async fn history(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let limit = params.limit.min(1000);
    let location_id = params
        .location
        .map(LocationId::new)
        .transpose()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let data = state.audit.query(&AuditQuery {
        location_id,
        terminal_only: !params.all_events,
        limit: Some(limit),
        ..Default::default()
    })?;

    Ok(Json(HistoryResponse {
        count: data.len(),
        limit,
        data,
    }))
}

/// One audit record by id
pub async fn audit_record(
    State(state): State<Arc<AppState>>,
    Path(record_id): Path<i64>,
) -> Result<Json<AuditRecord>, ApiError> {
    Ok(Json(state.audit.get(record_id)?))
}

/// Clear an override ahead of its expiry; clearing twice is not an error
pub async fn clear(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ClearResponse>, ApiError> {
    let override_id: Uuid = id
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("Invalid override id: {}", id)))?;

    let response = match state.engine.clear_override(override_id).await? {
        ClearOutcome::Cleared(record) => ClearResponse {
            override_id,
            outcome: "cleared",
            record: Some(record),
        },
        ClearOutcome::AlreadyInactive => ClearResponse {
            override_id,
            outcome: "already_inactive",
            record: None,
        },
    };

    Ok(Json(response))
}
