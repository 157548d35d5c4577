//! Error types for farfetch
//!
//! All errors in the application are converted to `AppError`,
//! which implements `IntoResponse` for proper HTTP error responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::data::DatabaseError;
use crate::federation::{FetchError, ResolveError, SignatureError};

/// Application-wide error type
///
/// This enum represents all possible errors that can occur
/// in the application. It implements `IntoResponse` to
/// automatically convert errors to appropriate HTTP responses.
#[derive(Debug, Error)]
pub enum AppError {
    /// Resource not found (404)
    #[error("Resource not found")]
    NotFound,

    /// Validation error (400)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Database error (500)
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    /// Remote object resolution failed (status depends on the cause)
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    /// Signature verification failed (401)
    #[error("Invalid signature: {0}")]
    InvalidSignature(#[from] SignatureError),

    /// Configuration error (500)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal server error (500)
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}

/// Map a resolution failure to a status code and error type label
fn resolve_status(error: &ResolveError) -> (StatusCode, &'static str) {
    match error.root() {
        ResolveError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
        ResolveError::BlockedDomain { .. } => (StatusCode::FORBIDDEN, "blocked_domain"),
        ResolveError::Schema { .. } => (StatusCode::UNPROCESSABLE_ENTITY, "schema"),
        ResolveError::Fetch { source, .. } => match source {
            FetchError::RemoteNotFound | FetchError::Gone => {
                (StatusCode::NOT_FOUND, "remote_not_found")
            }
            FetchError::UnsafeUrl(_) => (StatusCode::FORBIDDEN, "unsafe_url"),
            _ => (StatusCode::BAD_GATEWAY, "fetch"),
        },
        ResolveError::ConflictRetryExhausted(_) | ResolveError::Store { .. } => {
            (StatusCode::INTERNAL_SERVER_ERROR, "store")
        }
        // root() never returns an Actor wrapper
        ResolveError::Actor { .. } => (StatusCode::BAD_GATEWAY, "fetch"),
    }
}

impl IntoResponse for AppError {
    /// Convert error to HTTP response
    ///
    /// Maps each error variant to appropriate HTTP status code
    /// and JSON error body.
    fn into_response(self) -> Response {
        use axum::Json;

        let (status, error_message, error_type) = match &self {
            AppError::NotFound => (StatusCode::NOT_FOUND, self.to_string(), "not_found"),
            AppError::InvalidSignature(_) => (
                StatusCode::UNAUTHORIZED,
                self.to_string(),
                "invalid_signature",
            ),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone(), "validation"),
            AppError::Resolve(error) => {
                let (status, error_type) = resolve_status(error);
                if status.is_server_error() {
                    tracing::warn!(uri = %error.uri(), error = %error, "Resolution failed");
                }
                (status, error.to_string(), error_type)
            }
            AppError::Database(error) => {
                tracing::error!(error = %error, "Database error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Database error".to_string(),
                    "database",
                )
            }
            AppError::Config(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone(), "config"),
            AppError::Internal(error) => {
                tracing::error!(error = %error, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                    "internal",
                )
            }
        };

        // Record error metric
        use crate::metrics::ERRORS_TOTAL;
        ERRORS_TOTAL
            .with_label_values(&[error_type, "unknown"])
            .inc();

        let body = Json(serde_json::json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}
