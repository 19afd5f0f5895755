//! Override Audit Trail
//!
//! Keeps the lifecycle events of emergency overrides (created, refreshed,
//! expired, cleared) for operators and after-the-fact review.

mod store;

pub use store::{spawn_recorder, AuditLog, AuditQuery, AuditRecord};

use thiserror::Error;

/// Audit errors
#[derive(Debug, Error)]
pub enum AuditError {
    #[error("Audit store error: {0}")]
    Store(String),
    #[error("Audit record not found: {0}")]
    NotFound(i64),
}
