//! Detector sample ingestion

use axum::{extract::State, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use traffic_model::{DetectionSample, Direction, DirectionState, LocationId};

use crate::{error::ApiError, AppState};

/// Sample as posted by a detector collaborator
#[derive(Debug, Deserialize)]
pub struct SamplePayload {
    pub location_id: String,
    /// north, south, east, west or their initials
    pub direction: String,
    /// Detector timestamp; reception time when absent
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub vehicle_counts: BTreeMap<String, i64>,
    #[serde(default)]
    pub emergency_detected: bool,
    pub emergency_confidence: Option<f64>,
    pub emergency_class: Option<String>,
}

impl SamplePayload {
    fn into_sample(self) -> Result<DetectionSample, ApiError> {
        let location_id =
            LocationId::new(self.location_id).map_err(|e| ApiError::BadRequest(e.to_string()))?;
        let direction: Direction = self
            .direction
            .parse()
            .map_err(|e: traffic_model::ModelError| ApiError::BadRequest(e.to_string()))?;

        let mut sample = DetectionSample::new(
            location_id,
            direction,
            self.timestamp.unwrap_or_else(Utc::now),
        );
        sample.vehicle_counts = self.vehicle_counts;
        sample.emergency_detected = self.emergency_detected;
        sample.emergency_confidence = self
            .emergency_confidence
            .unwrap_or(if self.emergency_detected { 1.0 } else { 0.0 });
        sample.emergency_class = self.emergency_class;
        Ok(sample)
    }
}

#[derive(Debug, Serialize)]
pub struct IngestResponse {
    pub location_id: LocationId,
    pub direction: Direction,
    pub density: DirectionState,
}

/// Apply one detector sample
pub async fn post_sample(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<SamplePayload>,
) -> Result<Json<IngestResponse>, ApiError> {
    let sample = payload.into_sample()?;
    let location_id = sample.location_id.clone();
    let direction = sample.direction;

    let density = state.engine.ingest(sample).await?;

    Ok(Json(IngestResponse {
        location_id,
        direction,
        density,
    }))
}
