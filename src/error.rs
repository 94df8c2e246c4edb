// Error handling module
// Defines error types and HTTP response conversion

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::models::benchmark::ShapeError;

/// API errors that can occur while serving benchmark requests
#[derive(Error, Debug)]
pub enum ApiError {
    /// Request validation error
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Invalid load shape
    #[error("Invalid load shape: {0}")]
    InvalidShape(#[from] ShapeError),

    /// The inference endpoint did not produce a usable answer
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match self {
            ApiError::ValidationError(msg) => (StatusCode::BAD_REQUEST, "validation_error", msg),
            ApiError::InvalidShape(err) => {
                (StatusCode::BAD_REQUEST, "invalid_shape", err.to_string())
            }
            ApiError::Upstream(msg) => (StatusCode::BAD_GATEWAY, "upstream_error", msg),
            ApiError::Internal(err) => {
                tracing::error!("Internal error: {:?}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "Internal server error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "message": message,
                "type": error_type,
            }
        }));

        (status, body).into_response()
    }
}
