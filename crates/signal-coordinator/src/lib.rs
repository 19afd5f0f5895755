//! Signal State Coordination
//!
//! Turns detector samples into the authoritative signal state of each
//! intersection. Every location is served by its own actor task, so the
//! state and emergency override of one location are only ever mutated in
//! sequence while different locations proceed in parallel.

mod actor;
pub mod clock;
pub mod config;
pub mod coordinator;
mod engine;
mod index;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{EngineConfig, LocationSeed};
pub use coordinator::{SignalStateCoordinator, Trigger};
pub use engine::SignalEngine;

pub use emergency_override::ClearOutcome;
pub use live_broadcast::Subscriber;

use thiserror::Error;
use traffic_model::{LocationId, ModelError};
use uuid::Uuid;

/// Engine errors
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Unknown location: {0}")]
    LocationNotFound(LocationId),

    #[error("Location is deactivated: {0}")]
    LocationInactive(LocationId),

    #[error("Unknown override: {0}")]
    OverrideNotFound(Uuid),

    #[error("Invalid manual timing: {0}")]
    InvalidManualTiming(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Location {0} is not accepting commands")]
    ChannelClosed(LocationId),

    #[error("Engine must be created inside a tokio runtime")]
    NoRuntime,

    #[error(transparent)]
    Model(#[from] ModelError),
}
