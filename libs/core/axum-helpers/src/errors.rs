//! Application error type with the HTTP status mapping.
//!
//! Status policy: 400 for malformed input, 401 for bad credentials, 404
//! for missing entities, 409 for illegal state transitions, 410 for
//! expired resources, 429 for local backpressure, 5xx for internal
//! faults. Data-plane errors convert via `From<JobError>`.

use crate::response::ApiResponse;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use domain_jobs::JobError;
use thiserror::Error;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AppError {
    #[error("Bad Request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Not Found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Gone: {0}")]
    Gone(String),

    #[error("Too Many Requests: {0}")]
    TooManyRequests(String),

    #[error("Internal Server Error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Gone(_) => StatusCode::GONE,
            Self::TooManyRequests(_) => StatusCode::TOO_MANY_REQUESTS,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<JobError> for AppError {
    fn from(err: JobError) -> Self {
        match err {
            JobError::NotFound(what) => Self::NotFound(what),
            JobError::Validation(message) => Self::BadRequest(message),
            JobError::IllegalTransition { .. } => Self::Conflict(err.to_string()),
            JobError::Redis(_)
            | JobError::Serialization(_)
            | JobError::CorruptRecord { .. }
            | JobError::Internal(_) => {
                tracing::error!(error = %err, "Data-plane error surfaced to API");
                Self::Internal("internal data-plane error".to_string())
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        // 5xx details stay in the logs, not on the wire.
        let message = match &self {
            Self::Internal(_) => "internal server error".to_string(),
            other => other.to_string(),
        };
        (status, ApiResponse::error(message)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            AppError::BadRequest("x".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(AppError::NotFound("x".into()).status(), StatusCode::NOT_FOUND);
        assert_eq!(AppError::Conflict("x".into()).status(), StatusCode::CONFLICT);
        assert_eq!(AppError::Gone("x".into()).status(), StatusCode::GONE);
        assert_eq!(
            AppError::TooManyRequests("x".into()).status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            AppError::Internal("x".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_job_error_conversion() {
        let err: AppError = JobError::NotFound("job 'j1'".into()).into();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);

        let err: AppError = JobError::Validation("missing service".into()).into();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);

        let err: AppError = JobError::IllegalTransition {
            job_id: "j1".into(),
            status: "completed".into(),
            action: "cancel",
        }
        .into();
        assert_eq!(err.status(), StatusCode::CONFLICT);

        let err: AppError = JobError::Internal("boom".into()).into();
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
