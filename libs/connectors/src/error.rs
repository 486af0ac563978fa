//! Connector error type, pre-classified for retry policy.

use domain_jobs::error::FailureKind;
use thiserror::Error;

/// Failure surfaced by a connector, carrying its classification.
#[derive(Error, Debug)]
pub enum ConnectorError {
    /// The backend rejected or failed the job; `kind` decides retry.
    #[error("{kind}: {message}")]
    Execution { kind: FailureKind, message: String },

    /// The job never reached the backend (transport-level failure).
    #[error("transport error: {0}")]
    Transport(String),

    /// The connector observed the cancellation signal and stopped.
    #[error("cancelled")]
    Cancelled,

    /// Startup probe failed; the service is not advertised.
    #[error("probe failed: {0}")]
    Probe(String),
}

impl ConnectorError {
    pub fn execution(kind: FailureKind, message: impl Into<String>) -> Self {
        Self::Execution {
            kind,
            message: message.into(),
        }
    }

    /// The failure classification the worker records on the job.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Self::Execution { kind, .. } => *kind,
            Self::Transport(_) | Self::Probe(_) => FailureKind::TransientNetwork,
            Self::Cancelled => FailureKind::Cancelled,
        }
    }

    /// Classify an HTTP status from a backend into an execution error.
    pub fn from_status(status: u16, body_snippet: &str) -> Self {
        let kind = match status {
            429 => FailureKind::RateLimit,
            400 | 422 => FailureKind::MalformedJob,
            s if s >= 500 => FailureKind::TransientNetwork,
            _ => FailureKind::classify_message(body_snippet),
        };
        Self::Execution {
            kind,
            message: format!("backend returned HTTP {}: {}", status, body_snippet),
        }
    }
}

impl From<reqwest::Error> for ConnectorError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            Self::Transport(err.to_string())
        } else if let Some(status) = err.status() {
            Self::from_status(status.as_u16(), &err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert_eq!(
            ConnectorError::from_status(429, "slow down").failure_kind(),
            FailureKind::RateLimit
        );
        assert_eq!(
            ConnectorError::from_status(503, "unavailable").failure_kind(),
            FailureKind::TransientNetwork
        );
        assert_eq!(
            ConnectorError::from_status(400, "bad request").failure_kind(),
            FailureKind::MalformedJob
        );
    }

    #[test]
    fn test_cancelled_kind() {
        assert_eq!(
            ConnectorError::Cancelled.failure_kind(),
            FailureKind::Cancelled
        );
    }

    #[test]
    fn test_transport_is_transient() {
        assert_eq!(
            ConnectorError::Transport("reset".into()).failure_kind(),
            FailureKind::TransientNetwork
        );
    }
}
