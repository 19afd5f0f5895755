//! Traffic Model
//!
//! Shared types for the intersection signal control engine: compass
//! directions, detection samples coming from the detector feed, derived
//! per-direction density state, the authoritative per-location signal state,
//! and emergency override records.

mod direction;
mod emergency;
mod sample;
mod state;

pub use direction::{Direction, LocationId};
pub use emergency::{EmergencyOverride, OverrideEvent, OverrideEventKind, OverrideStatus, PriorityLevel};
pub use sample::DetectionSample;
pub use state::{
    DirectionState, ManualPhase, ManualTiming, SignalMode, SignalPhase, SignalState, TrafficAnomaly,
    TrafficLevel,
};

use thiserror::Error;

/// Model parsing errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ModelError {
    #[error("Unknown direction: {0}")]
    UnknownDirection(String),

    #[error("Invalid location id: {0:?}")]
    InvalidLocationId(String),
}
