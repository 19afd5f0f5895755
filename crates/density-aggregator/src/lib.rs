//! Traffic Density Aggregation
//!
//! Turns per-direction detection samples into congestion metrics:
//! - Bounded rolling window per approach
//! - Congestion level against a deployment threshold
//! - Traffic level classification and window anomalies
//! - Staleness tracking for approaches whose camera went quiet

mod aggregator;
mod window;

pub use aggregator::{congestion_level, DensityAggregator, DensityConfig};
pub use window::{SampleWindow, WindowEntry};
