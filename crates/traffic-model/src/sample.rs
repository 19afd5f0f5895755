//! Detection samples produced by the external vehicle detector

use crate::{Direction, LocationId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A point-in-time detection snapshot for one approach of one intersection.
///
/// Counts are a snapshot of what is visible in the frame, not a delta since
/// the previous sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionSample {
    pub location_id: LocationId,
    pub direction: Direction,
    pub timestamp: DateTime<Utc>,
    /// Vehicle counts keyed by detector class name (car, bus, truck, ...)
    #[serde(default)]
    pub vehicle_counts: BTreeMap<String, i64>,
    #[serde(default)]
    pub emergency_detected: bool,
    #[serde(default)]
    pub emergency_confidence: f64,
    /// Detector class of the emergency vehicle, when the detector reports one
    #[serde(default)]
    pub emergency_class: Option<String>,
}

impl DetectionSample {
    /// Create an empty sample (no vehicles, no emergency)
    pub fn new(location_id: LocationId, direction: Direction, timestamp: DateTime<Utc>) -> Self {
        Self {
            location_id,
            direction,
            timestamp,
            vehicle_counts: BTreeMap::new(),
            emergency_detected: false,
            emergency_confidence: 0.0,
            emergency_class: None,
        }
    }

    /// Add a class count
    pub fn with_count(mut self, class: impl Into<String>, count: i64) -> Self {
        let entry = self.vehicle_counts.entry(class.into()).or_insert(0);
        *entry = entry.saturating_add(count);
        self
    }

    /// Flag the sample as carrying an emergency vehicle
    pub fn with_emergency(mut self, confidence: f64, class: Option<&str>) -> Self {
        self.emergency_detected = true;
        self.emergency_confidence = confidence;
        self.emergency_class = class.map(str::to_string);
        self
    }

    /// Total vehicles in the snapshot; negative counts contribute nothing
    pub fn total_vehicles(&self) -> u32 {
        let total = self
            .vehicle_counts
            .values()
            .fold(0i64, |acc, &c| acc.saturating_add(c.max(0)));
        total.min(u32::MAX as i64) as u32
    }
}
