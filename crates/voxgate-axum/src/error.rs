//! Axum-specific error types and mappings.
//!
//! Maps `GatewayError` kinds to HTTP status codes and a JSON body with a
//! stable `stage` discriminant for client-side handling.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

use voxgate_core::error::GatewayError;

/// Transport-level error for the HTTP handlers.
#[derive(Debug, Error)]
pub enum HttpError {
    /// Missing or invalid bearer token.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Bad request (invalid input).
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Process is at its connection/work cap.
    #[error("over capacity: {0}")]
    OverCapacity(String),

    /// Gateway-internal failure.
    #[error("internal error: {0}")]
    Internal(String),
}

/// JSON error response body.
#[derive(Serialize)]
struct ErrorBody {
    error: String,
    status: u16,
    /// Originating subsystem, mirroring the event envelope's `stage`.
    #[serde(skip_serializing_if = "Option::is_none")]
    stage: Option<String>,
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let (status, stage) = match &self {
            Self::Unauthorized(_) => (StatusCode::UNAUTHORIZED, Some("authentication")),
            Self::BadRequest(_) => (StatusCode::BAD_REQUEST, Some("validation")),
            Self::OverCapacity(_) => (StatusCode::SERVICE_UNAVAILABLE, None),
            Self::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, None),
        };
        let body = ErrorBody {
            error: self.to_string(),
            status: status.as_u16(),
            stage: stage.map(str::to_string),
        };
        (status, axum::Json(body)).into_response()
    }
}

impl From<GatewayError> for HttpError {
    fn from(err: GatewayError) -> Self {
        match &err {
            GatewayError::Validation(msg) => Self::BadRequest(msg.clone()),
            GatewayError::Authentication(msg) => Self::Unauthorized(msg.clone()),
            GatewayError::Configuration(msg) => Self::BadRequest(msg.clone()),
            _ => Self::Internal(err.to_string()),
        }
    }
}
