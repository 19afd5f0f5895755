//! Per-location density aggregator

use crate::window::{SampleWindow, WindowEntry};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};
use traffic_model::{DetectionSample, Direction, DirectionState, TrafficAnomaly, TrafficLevel};

/// Congestion level treated as congested
const CONGESTED_LEVEL: u8 = 85;

/// Below this historical mean a drop in traffic is not considered an anomaly
const DECREASE_MIN_MEAN: f64 = 5.0;

/// Aggregator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DensityConfig {
    /// Vehicle count that maps to 100% congestion
    pub congestion_threshold: u32,
    /// Samples kept per direction
    pub window_size: usize,
}

impl Default for DensityConfig {
    fn default() -> Self {
        Self {
            congestion_threshold: 20,
            window_size: 5,
        }
    }
}

/// `min(100, round(100 * count / threshold))`; a zero threshold saturates
pub fn congestion_level(vehicle_count: u32, threshold: u32) -> u8 {
    if threshold == 0 {
        return if vehicle_count == 0 { 0 } else { 100 };
    }
    let level = (100.0 * vehicle_count as f64 / threshold as f64).round();
    level.min(100.0) as u8
}

/// Window and latest derived state of one approach
#[derive(Debug, Clone)]
struct DirectionWindow {
    window: SampleWindow,
    latest: DirectionState,
}

impl DirectionWindow {
    fn new(capacity: usize) -> Self {
        Self {
            window: SampleWindow::new(capacity),
            latest: DirectionState::default(),
        }
    }
}

/// Density aggregator for the approaches of one intersection
pub struct DensityAggregator {
    config: DensityConfig,
    directions: BTreeMap<Direction, DirectionWindow>,
}

impl DensityAggregator {
    /// Create a new aggregator with no known directions
    pub fn new(config: DensityConfig) -> Self {
        Self {
            config,
            directions: BTreeMap::new(),
        }
    }

    /// Make a direction known before any sample arrives for it
    pub fn register_direction(&mut self, direction: Direction) {
        let capacity = self.config.window_size;
        self.directions
            .entry(direction)
            .or_insert_with(|| DirectionWindow::new(capacity));
    }

    /// Fold a sample into its direction's window and return the derived state
    pub fn ingest(&mut self, sample: &DetectionSample, received_at: DateTime<Utc>) -> DirectionState {
        let capacity = self.config.window_size;
        let threshold = self.config.congestion_threshold;

        let entry = self.directions.entry(sample.direction).or_insert_with(|| {
            info!(
                "Registering direction {} at {}",
                sample.direction, sample.location_id
            );
            DirectionWindow::new(capacity)
        });

        let vehicle_count = sample.total_vehicles();
        entry.window.push(WindowEntry {
            received_at,
            total: vehicle_count,
        });

        let congestion = congestion_level(vehicle_count, threshold);
        let vehicle_types = sample
            .vehicle_counts
            .iter()
            .map(|(class, &count)| (class.clone(), count.clamp(0, u32::MAX as i64) as u32))
            .collect();

        entry.latest = DirectionState {
            vehicle_count,
            average_vehicle_count: entry.window.mean(),
            congestion_level: congestion,
            traffic_level: TrafficLevel::from_congestion(congestion),
            is_congested: congestion >= CONGESTED_LEVEL,
            vehicle_types,
            anomalies: detect_anomalies(&entry.window, threshold),
            stale: false,
            last_sample_at: Some(received_at),
            ..Default::default()
        };

        debug!(
            "Ingested {}/{}: {} vehicles, congestion {}%",
            sample.location_id, sample.direction, vehicle_count, congestion
        );

        entry.latest.clone()
    }

    /// Known directions in ordinal order
    pub fn directions(&self) -> impl Iterator<Item = Direction> + '_ {
        self.directions.keys().copied()
    }

    pub fn direction_count(&self) -> usize {
        self.directions.len()
    }

    /// Latest derived state of a direction
    pub fn density(&self, direction: Direction) -> Option<&DirectionState> {
        self.directions.get(&direction).map(|d| &d.latest)
    }

    /// Whether a direction has had no sample within the staleness window
    pub fn is_stale(&self, direction: Direction, now: DateTime<Utc>, staleness: Duration) -> bool {
        match self.directions.get(&direction).and_then(|d| d.window.back()) {
            Some(entry) => now - entry.received_at > staleness,
            None => true,
        }
    }

    /// Vehicle counts for timing; stale directions count as empty
    pub fn timing_counts(&self, now: DateTime<Utc>, staleness: Duration) -> BTreeMap<Direction, i64> {
        self.directions
            .iter()
            .map(|(dir, state)| {
                let count = if self.is_stale(*dir, now, staleness) {
                    0
                } else {
                    state.latest.vehicle_count as i64
                };
                (*dir, count)
            })
            .collect()
    }

    /// Density state of every direction with staleness evaluated at `now`
    pub fn snapshot(&self, now: DateTime<Utc>, staleness: Duration) -> BTreeMap<Direction, DirectionState> {
        self.directions
            .iter()
            .map(|(dir, state)| {
                let mut latest = state.latest.clone();
                latest.stale = self.is_stale(*dir, now, staleness);
                (*dir, latest)
            })
            .collect()
    }
}

impl Default for DensityAggregator {
    fn default() -> Self {
        Self::new(DensityConfig::default())
    }
}

/// Window anomalies, only evaluated once the window is full
fn detect_anomalies(window: &SampleWindow, threshold: u32) -> Vec<TrafficAnomaly> {
    let mut anomalies = Vec::new();
    if !window.is_full() || window.capacity() < 3 {
        return anomalies;
    }

    let current = match window.back() {
        Some(entry) => entry.total as f64,
        None => return anomalies,
    };

    if let Some((mean, std_dev)) = window.history_stats() {
        if current > mean + 2.0 * std_dev {
            anomalies.push(TrafficAnomaly::SuddenIncrease);
        }
        if current < mean - 2.0 * std_dev && mean > DECREASE_MIN_MEAN {
            anomalies.push(TrafficAnomaly::SuddenDecrease);
        }
    }

    if threshold > 0 && window.iter().all(|e| e.total >= threshold) {
        anomalies.push(TrafficAnomaly::PersistentCongestion);
    }

    anomalies
}
