//! HTTP error mapping

use audit_log::AuditError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use signal_coordinator::EngineError;
use thiserror::Error;
use tracing::error;

/// API errors
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Unavailable(String),

    #[error("{0}")]
    Internal(String),
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl ApiError {
    fn status(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            ApiError::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
            ApiError::Unavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "unavailable"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error) = self.status();
        if status.is_server_error() {
            error!("Request failed: {}", self);
        }
        (
            status,
            Json(ErrorBody {
                error,
                message: self.to_string(),
            }),
        )
            .into_response()
    }
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::LocationNotFound(_) | EngineError::OverrideNotFound(_) => {
                ApiError::NotFound(e.to_string())
            }
            EngineError::LocationInactive(_) => ApiError::Conflict(e.to_string()),
            EngineError::InvalidManualTiming(_) | EngineError::Model(_) => {
                ApiError::BadRequest(e.to_string())
            }
            EngineError::ChannelClosed(_) => ApiError::Unavailable(e.to_string()),
            EngineError::InvalidConfig(_) | EngineError::NoRuntime => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<AuditError> for ApiError {
    fn from(e: AuditError) -> Self {
        match e {
            AuditError::NotFound(_) => ApiError::NotFound(e.to_string()),
            AuditError::Store(_) => ApiError::Internal(e.to_string()),
        }
    }
}
