//! API error types and responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tally_collectors::CollectorError;
use tally_core::CoreError;
use tally_store::StoreError;

use crate::engine::EngineError;

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Unauthorized - missing or invalid service key.
    #[error("unauthorized")]
    Unauthorized,

    /// Resource not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Bad request - invalid input.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Conflict - correlation ID reuse or invalid run transition.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A batch could not be persisted; replay it with the same correlation ID.
    #[error("persistence failure: {message}")]
    PersistenceFailure {
        /// Correlation ID of the failed batch.
        correlation_id: String,
        /// Store error.
        message: String,
    },

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),

    /// External service error.
    #[error("external service error: {0}")]
    ExternalService(String),
}

/// JSON error response body.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message, details) = match &self {
            Self::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                self.to_string(),
                None,
            ),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg.clone(), None),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg.clone(), None),
            Self::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg.clone(), None),
            Self::PersistenceFailure {
                correlation_id,
                message,
            } => {
                tracing::error!(correlation_id = %correlation_id, error = %message, "Batch not persisted");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "persistence_failure",
                    "Events could not be persisted; retry with the same correlation id".to_string(),
                    Some(serde_json::json!({ "correlationId": correlation_id })),
                )
            }
            Self::Internal(msg) => {
                tracing::error!(error = %msg, "Internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".to_string(),
                    None,
                )
            }
            Self::ExternalService(msg) => (
                StatusCode::BAD_GATEWAY,
                "external_service_error",
                msg.clone(),
                None,
            ),
        };

        let body = ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message,
                details,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::InvalidRunTransition { .. } => Self::Conflict(err.to_string()),
            _ => Self::BadRequest(err.to_string()),
        }
    }
}

impl From<CollectorError> for ApiError {
    fn from(err: CollectorError) -> Self {
        match err {
            CollectorError::UnknownProvider(_) => Self::NotFound(err.to_string()),
            CollectorError::Configuration(msg) => Self::Internal(msg),
            other => Self::ExternalService(other.to_string()),
        }
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Collector(e) => e.into(),
            EngineError::PersistenceFailure {
                correlation_id,
                message,
            } => Self::PersistenceFailure {
                correlation_id: correlation_id.to_string(),
                message,
            },
            EngineError::Store(e) => e.into(),
            EngineError::Core(e) => e.into(),
            EngineError::RunNotFound(_) => Self::NotFound(err.to_string()),
            EngineError::CorrelationConflict(_) | EngineError::RunFinished(_) => {
                Self::Conflict(err.to_string())
            }
            EngineError::MixedCurrency { .. } => Self::BadRequest(err.to_string()),
        }
    }
}
