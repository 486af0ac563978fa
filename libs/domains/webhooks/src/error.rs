//! Webhook error types.

use axum_helpers::AppError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WebhookError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Webhook not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Delivery queue saturated")]
    QueueFull,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<validator::ValidationErrors> for WebhookError {
    fn from(err: validator::ValidationErrors) -> Self {
        Self::Validation(err.to_string())
    }
}

impl From<WebhookError> for AppError {
    fn from(err: WebhookError) -> Self {
        match err {
            WebhookError::NotFound(what) => AppError::NotFound(what),
            WebhookError::Validation(message) => AppError::BadRequest(message),
            WebhookError::QueueFull => AppError::TooManyRequests("delivery queue full".into()),
            other => {
                tracing::error!(error = %other, "Webhook subsystem error surfaced to API");
                AppError::Internal("internal webhook error".to_string())
            }
        }
    }
}
