//! Engine configuration

use crate::EngineError;
use chrono::Duration;
use density_aggregator::DensityConfig;
use emergency_override::OverrideConfig;
use live_broadcast::BroadcastConfig;
use sample_validator::ValidationConfig;
use serde::{Deserialize, Serialize};
use signal_timing::GreenBounds;
use traffic_model::Direction;

/// Location registered from configuration rather than first sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationSeed {
    pub id: String,
    #[serde(default)]
    pub directions: Vec<Direction>,
}

/// Per-deployment engine constants
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Minimum green time (seconds)
    pub min_green: u32,
    /// Maximum green time (seconds)
    pub max_green: u32,
    /// Scaling constant `k` of the proportional rule
    pub scaling_k: f64,
    /// Vehicle count that maps to 100% congestion
    pub congestion_threshold: u32,
    /// Samples kept per direction
    pub window_size: usize,
    /// Emergency override lifetime after the latest emergency sample (seconds)
    pub override_duration_secs: i64,
    /// Terminal overrides remembered per location
    pub override_history: usize,
    /// A direction without samples for this long is timed as empty (seconds)
    pub staleness_window_secs: i64,
    /// Adaptive re-evaluation cadence (seconds)
    pub rotation_cadence_secs: u64,
    /// Expiry sweep period (milliseconds)
    pub sweep_interval_millis: u64,
    /// Yellow clearance before an adaptive green moves (seconds, 0 disables)
    pub yellow_secs: i64,
    /// Buffered snapshots per live subscriber
    pub subscriber_queue_capacity: usize,
    /// Pending commands per location actor
    pub command_queue_capacity: usize,
    /// Lifecycle events buffered for audit consumers
    pub event_queue_capacity: usize,
    /// Emergency flags below this detector confidence are ignored
    pub min_emergency_confidence: f64,
    /// Hours of day (UTC) treated as peak for cycle recommendations
    pub peak_hours: Vec<u32>,
    /// Locations to register at start-up
    pub locations: Vec<LocationSeed>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            min_green: 15,
            max_green: 120,
            scaling_k: 1.0,
            congestion_threshold: 20,
            window_size: 5,
            override_duration_secs: 60,
            override_history: 32,
            staleness_window_secs: 30,
            rotation_cadence_secs: 5,
            sweep_interval_millis: 1000,
            yellow_secs: 5,
            subscriber_queue_capacity: 64,
            command_queue_capacity: 256,
            event_queue_capacity: 1024,
            min_emergency_confidence: 0.0,
            peak_hours: vec![7, 8, 9, 17, 18, 19],
            locations: Vec::new(),
        }
    }
}

impl EngineConfig {
    /// Validate configuration values
    pub fn validate(&self) -> Result<(), EngineError> {
        let invalid = |msg: &str| Err(EngineError::InvalidConfig(msg.to_string()));

        if self.min_green == 0 {
            return invalid("min_green must be greater than 0");
        }
        if self.min_green > self.max_green {
            return invalid("min_green must not exceed max_green");
        }
        if !self.scaling_k.is_finite() || self.scaling_k < 0.0 {
            return invalid("scaling_k must be a finite non-negative number");
        }
        if self.congestion_threshold == 0 {
            return invalid("congestion_threshold must be greater than 0");
        }
        if self.window_size == 0 {
            return invalid("window_size must be greater than 0");
        }
        if self.override_duration_secs <= 0 {
            return invalid("override_duration_secs must be greater than 0");
        }
        if self.staleness_window_secs <= 0 {
            return invalid("staleness_window_secs must be greater than 0");
        }
        if self.rotation_cadence_secs == 0 || self.sweep_interval_millis == 0 {
            return invalid("rotation cadence and sweep interval must be greater than 0");
        }
        if self.yellow_secs < 0 {
            return invalid("yellow_secs must not be negative");
        }
        if self.subscriber_queue_capacity == 0
            || self.command_queue_capacity == 0
            || self.event_queue_capacity == 0
        {
            return invalid("queue capacities must be greater than 0");
        }
        if !(0.0..=1.0).contains(&self.min_emergency_confidence) {
            return invalid("min_emergency_confidence must be within [0, 1]");
        }
        if self.peak_hours.iter().any(|&h| h > 23) {
            return invalid("peak_hours must be within 0..=23");
        }
        if self.locations.iter().any(|l| l.id.trim().is_empty()) {
            return invalid("configured location ids must not be blank");
        }
        Ok(())
    }

    pub fn bounds(&self) -> GreenBounds {
        GreenBounds::new(self.min_green, self.max_green)
    }

    pub fn staleness(&self) -> Duration {
        Duration::seconds(self.staleness_window_secs)
    }

    pub fn yellow(&self) -> Duration {
        Duration::seconds(self.yellow_secs)
    }

    pub fn rotation_cadence(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.rotation_cadence_secs)
    }

    pub fn sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.sweep_interval_millis)
    }

    pub fn density_config(&self) -> DensityConfig {
        DensityConfig {
            congestion_threshold: self.congestion_threshold,
            window_size: self.window_size,
        }
    }

    pub fn override_config(&self) -> OverrideConfig {
        OverrideConfig {
            duration_secs: self.override_duration_secs,
            history_capacity: self.override_history,
        }
    }

    pub fn broadcast_config(&self) -> BroadcastConfig {
        BroadcastConfig {
            queue_capacity: self.subscriber_queue_capacity,
        }
    }

    pub fn validation_config(&self) -> ValidationConfig {
        ValidationConfig {
            min_emergency_confidence: self.min_emergency_confidence,
            ..Default::default()
        }
    }
}
