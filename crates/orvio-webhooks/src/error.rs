//! Error types for the webhook delivery engine.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use utoipa::ToSchema;

/// Webhook engine error variants.
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Invalid event type: {0}")]
    InvalidEventType(String),

    #[error("Invalid custom header: {0}")]
    InvalidHeader(String),

    #[error("Destination limit ({limit}) reached for tenant")]
    DestinationLimitExceeded { limit: i64 },

    #[error("Destination not found")]
    DestinationNotFound,

    #[error("Delivery not found")]
    DeliveryNotFound,

    #[error("Delivery is not retryable: {0}")]
    DeliveryNotRetryable(String),

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

/// JSON error response returned by webhook API endpoints.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub status: u16,
}

impl WebhookError {
    fn status_and_type(&self) -> (StatusCode, &'static str) {
        match self {
            WebhookError::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "database_error"),
            WebhookError::InvalidUrl(_) => (StatusCode::BAD_REQUEST, "invalid_url"),
            WebhookError::InvalidEventType(_) => (StatusCode::BAD_REQUEST, "invalid_event_type"),
            WebhookError::InvalidHeader(_) => (StatusCode::BAD_REQUEST, "invalid_header"),
            WebhookError::DestinationLimitExceeded { .. } => {
                (StatusCode::CONFLICT, "destination_limit_exceeded")
            }
            WebhookError::DestinationNotFound => (StatusCode::NOT_FOUND, "destination_not_found"),
            WebhookError::DeliveryNotFound => (StatusCode::NOT_FOUND, "delivery_not_found"),
            WebhookError::DeliveryNotRetryable(_) => {
                (StatusCode::CONFLICT, "delivery_not_retryable")
            }
            WebhookError::EncryptionFailed(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "encryption_error")
            }
            WebhookError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized"),
            WebhookError::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
            WebhookError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        }
    }
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        let (status, error_type) = self.status_and_type();

        let body = ErrorResponse {
            error: error_type.to_string(),
            message: self.to_string(),
            status: status.as_u16(),
        };

        (status, axum::Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, WebhookError>;
