//! Gateway error types.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use hearth_kernel::error::KernelError;
use serde_json::json;
use thiserror::Error;

/// Gateway-level errors, mapped onto HTTP status codes.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("entity not found: {0}")]
    EntityNotFound(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<KernelError> for GatewayError {
    fn from(err: KernelError) -> Self {
        match err {
            KernelError::NotFound(id) => GatewayError::EntityNotFound(id),
            KernelError::InvalidArgument(msg) => GatewayError::InvalidRequest(msg),
            other => GatewayError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            GatewayError::EntityNotFound(id) => (
                StatusCode::NOT_FOUND,
                "ENTITY_NOT_FOUND",
                format!("entity '{id}' not found"),
            ),
            GatewayError::InvalidRequest(msg) => {
                (StatusCode::BAD_REQUEST, "INVALID_REQUEST", msg.clone())
            }
            GatewayError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                msg.clone(),
            ),
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;
