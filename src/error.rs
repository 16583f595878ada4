//! HTTP error taxonomy for Chalkline.
//!
//! Handlers return `Result<_, ApiError>`; the [`IntoResponse`] impl maps each
//! variant to its status code. Validation, not-found, and conflict errors
//! carry a descriptive message. Anything else becomes a 500 with a generic
//! body; the underlying cause is logged but never exposed to the client.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// Errors surfaced by the HTTP API.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Malformed id or request body.
    #[error("{0}")]
    Validation(String),

    /// The referenced record does not exist.
    #[error("{0}")]
    NotFound(String),

    /// A uniqueness constraint was violated.
    #[error("{0}")]
    Conflict(String),

    /// Any unexpected failure (storage, serialization, ...).
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    /// Shorthand for a 404 on a missing record.
    pub fn not_found(kind: &str, id: &str) -> Self {
        ApiError::NotFound(format!("{} not found: {}", kind, id))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            ApiError::Internal(err) => {
                error!(error = %err, "Unhandled internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_string(),
                )
            }
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}
