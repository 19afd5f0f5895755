//! Derived per-direction state and the authoritative per-location signal state

use crate::{Direction, LocationId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Signal aspect shown to one approach
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalPhase {
    Green,
    Yellow,
    #[default]
    Red,
}

/// Which rule produced the current signal state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalMode {
    #[default]
    Adaptive,
    Emergency,
    Manual,
}

/// Coarse traffic classification of a congestion level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrafficLevel {
    #[default]
    Light,
    Moderate,
    Heavy,
    Congested,
}

impl TrafficLevel {
    /// Classify a 0-100 congestion level
    pub fn from_congestion(level: u8) -> Self {
        match level {
            0..=39 => TrafficLevel::Light,
            40..=69 => TrafficLevel::Moderate,
            70..=84 => TrafficLevel::Heavy,
            _ => TrafficLevel::Congested,
        }
    }
}

/// Window-level traffic anomaly flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrafficAnomaly {
    SuddenIncrease,
    SuddenDecrease,
    PersistentCongestion,
}

/// Derived state of one approach
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DirectionState {
    /// Total vehicles in the latest sample
    pub vehicle_count: u32,
    /// Mean total over the rolling window
    pub average_vehicle_count: f64,
    /// 0-100
    pub congestion_level: u8,
    pub traffic_level: TrafficLevel,
    pub is_congested: bool,
    /// Class breakdown of the latest sample
    pub vehicle_types: BTreeMap<String, u32>,
    pub anomalies: Vec<TrafficAnomaly>,
    pub signal_phase: SignalPhase,
    pub green_time_seconds: u32,
    /// No sample within the staleness window; timed as if empty
    pub stale: bool,
    pub last_sample_at: Option<DateTime<Utc>>,
}

/// Authoritative signal state of one intersection.
///
/// Only the location's coordinator builds these; everyone else receives
/// immutable snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalState {
    pub location_id: LocationId,
    /// Monotonic per location, bumped on every published change
    pub version: u64,
    pub active: bool,
    pub directions: BTreeMap<Direction, DirectionState>,
    /// Direction currently granted green (or clearing on yellow)
    pub active_direction: Option<Direction>,
    pub mode: SignalMode,
    pub override_id: Option<Uuid>,
    /// Recommended cycle length (adaptive mode only)
    pub cycle_length_seconds: Option<u32>,
    /// Demand/allocation match score 0-100 (adaptive mode only)
    pub efficiency: Option<f64>,
    pub updated_at: DateTime<Utc>,
}

impl SignalState {
    /// Empty adaptive state for a freshly registered location
    pub fn new(location_id: LocationId, now: DateTime<Utc>) -> Self {
        Self {
            location_id,
            version: 0,
            active: true,
            directions: BTreeMap::new(),
            active_direction: None,
            mode: SignalMode::Adaptive,
            override_id: None,
            cycle_length_seconds: None,
            efficiency: None,
            updated_at: now,
        }
    }

    /// Compare everything except version and timestamp
    pub fn same_signal(&self, other: &SignalState) -> bool {
        self.location_id == other.location_id
            && self.active == other.active
            && self.directions == other.directions
            && self.active_direction == other.active_direction
            && self.mode == other.mode
            && self.override_id == other.override_id
            && self.cycle_length_seconds == other.cycle_length_seconds
            && self.efficiency == other.efficiency
    }

    /// Phase shown to a direction, if the direction is known
    pub fn phase_of(&self, direction: Direction) -> Option<SignalPhase> {
        self.directions.get(&direction).map(|d| d.signal_phase)
    }

    /// Directions currently showing green
    pub fn green_directions(&self) -> Vec<Direction> {
        self.directions
            .iter()
            .filter(|(_, d)| d.signal_phase == SignalPhase::Green)
            .map(|(dir, _)| *dir)
            .collect()
    }
}

/// Operator-requested allocation for one direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManualPhase {
    pub green_time_seconds: u32,
    /// Explicit phase; when every entry omits it the longest allocation is green
    #[serde(default)]
    pub phase: Option<SignalPhase>,
}

/// Operator-set fixed allocation for a location
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ManualTiming {
    pub directions: BTreeMap<Direction, ManualPhase>,
}

impl ManualTiming {
    /// Build from plain direction -> seconds allocations
    pub fn from_times(times: impl IntoIterator<Item = (Direction, u32)>) -> Self {
        Self {
            directions: times
                .into_iter()
                .map(|(dir, secs)| {
                    (
                        dir,
                        ManualPhase {
                            green_time_seconds: secs,
                            phase: None,
                        },
                    )
                })
                .collect(),
        }
    }

    /// Pin the phase of one direction
    pub fn with_phase(mut self, direction: Direction, phase: SignalPhase) -> Self {
        if let Some(entry) = self.directions.get_mut(&direction) {
            entry.phase = Some(phase);
        }
        self
    }
}
