//! Validation Error Types

use thiserror::Error;

/// Corrections applied while sanitising a sample
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    /// Negative vehicle count, replaced by zero
    #[error("Negative count {value} for class {class}")]
    NegativeCount { class: String, value: i64 },

    /// Value out of allowed range, clamped
    #[error("{field} value {value} is out of range [{min}, {max}]")]
    OutOfRange {
        field: String,
        value: f64,
        min: f64,
        max: f64,
    },

    /// Emergency flag below the configured confidence, dropped
    #[error("Emergency confidence {confidence} below threshold {threshold}")]
    BelowConfidence { confidence: f64, threshold: f64 },

    /// Timestamp ahead of the engine clock, replaced by now
    #[error("Timestamp {skew_ms}ms in the future")]
    FutureTimestamp { skew_ms: i64 },

    /// Invalid data format
    #[error("Invalid data format: {0}")]
    InvalidFormat(String),
}
