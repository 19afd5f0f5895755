//! Emergency Override Management
//!
//! Tracks at most one active emergency override per intersection. The
//! single `Option` slot in `EmergencyOverrideManager` is the only place an
//! active override lives, so a second concurrent one cannot be represented.

mod manager;

pub use manager::{ClearOutcome, EmergencyOverrideManager, OverrideConfig, OverrideDecision};
