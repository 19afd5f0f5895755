//! Detection Sample Validation
//!
//! Malformed detector output is never fatal: out-of-range fields are clamped
//! or dropped and every correction is reported as a `ValidationError` so the
//! caller can log it.

mod error;
mod validator;

pub use error::ValidationError;
pub use validator::{SampleValidator, ValidationConfig, ValidationResult};
