//! Location state and operator control

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use std::sync::Arc;
use traffic_model::{Direction, LocationId, ManualTiming, SignalMode, SignalState};

use crate::{error::ApiError, AppState};

/// One row of the location overview
#[derive(Debug, Serialize)]
pub struct LocationSummary {
    pub location_id: LocationId,
    pub active: bool,
    pub mode: SignalMode,
    pub active_direction: Option<Direction>,
    pub version: u64,
    pub directions: usize,
}

#[derive(Debug, Serialize)]
pub struct LocationsResponse {
    pub data: Vec<LocationSummary>,
    pub count: usize,
}

fn location_id(raw: String) -> Result<LocationId, ApiError> {
    LocationId::new(raw).map_err(|e| ApiError::BadRequest(e.to_string()))
}

/// List every known location
pub async fn list_locations(State(state): State<Arc<AppState>>) -> Json<LocationsResponse> {
    let data: Vec<_> = state
        .engine
        .states()
        .into_iter()
        .map(|s| LocationSummary {
            location_id: s.location_id.clone(),
            active: s.active,
            mode: s.mode,
            active_direction: s.active_direction,
            version: s.version,
            directions: s.directions.len(),
        })
        .collect();

    Json(LocationsResponse {
        count: data.len(),
        data,
    })
}

/// Full signal state of one location
pub async fn get_state(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<SignalState>, ApiError> {
    let id = location_id(id)?;
    state
        .engine
        .current_state(&id)
        .map(|s| Json((*s).clone()))
        .ok_or_else(|| ApiError::NotFound(format!("Unknown location: {}", id)))
}

/// Pin a location to an operator allocation
pub async fn set_manual(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(timing): Json<ManualTiming>,
) -> Result<Json<SignalState>, ApiError> {
    let id = location_id(id)?;
    state.engine.set_manual_timing(&id, timing).await?;
    current(&state, &id)
}

/// Return a location to adaptive control
pub async fn clear_manual(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<SignalState>, ApiError> {
    let id = location_id(id)?;
    if !state.engine.clear_manual(&id).await? {
        return Err(ApiError::Conflict(format!("{} is not under manual control", id)));
    }
    current(&state, &id)
}

/// Stop serving a location
pub async fn deactivate(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<SignalState>), ApiError> {
    let id = location_id(id)?;
    let last = state.engine.deactivate_location(&id).await?;
    Ok((StatusCode::OK, Json((*last).clone())))
}

fn current(state: &AppState, id: &LocationId) -> Result<Json<SignalState>, ApiError> {
    state
        .engine
        .current_state(id)
        .map(|s| Json((*s).clone()))
        .ok_or_else(|| ApiError::NotFound(format!("Unknown location: {}", id)))
}
