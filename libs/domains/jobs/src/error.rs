//! Error types for the jobs data plane.
//!
//! `JobError` covers transport and state errors; `FailureKind` is the
//! classification attached to failed jobs and drives retry policy.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced by data-plane operations.
#[derive(Error, Debug)]
pub enum JobError {
    /// Redis connection or command error.
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// JSON serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Entity lookup failed.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Operation is not legal in the record's current status.
    #[error("Illegal transition for job {job_id}: cannot {action} while {status}")]
    IllegalTransition {
        job_id: String,
        status: String,
        action: &'static str,
    },

    /// Submitted record failed validation.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Malformed record read back from Redis.
    #[error("Corrupt record at {key}: {details}")]
    CorruptRecord { key: String, details: String },

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl JobError {
    /// Check if this is a connection-level error worth backing off on.
    pub fn is_connection_error(&self) -> bool {
        match self {
            Self::Redis(e) => {
                let err_str = e.to_string().to_lowercase();
                err_str.contains("connection")
                    || err_str.contains("disconnected")
                    || err_str.contains("broken pipe")
                    || err_str.contains("reset by peer")
                    || err_str.contains("refused")
                    || err_str.contains("eof")
                    || err_str.contains("io error")
            }
            _ => false,
        }
    }
}

/// Classification of a job failure, attached to the record and to
/// attestations. The kind decides whether the job is retried and where.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// OOM, GPU memory, disk full. Retry, ideally on a different worker.
    ResourceExhaustion,
    /// Remote API returned 429. Retry with backoff.
    RateLimit,
    /// Timeout, connection reset, 5xx. Retry with backoff.
    TransientNetwork,
    /// Content policy rejection. Permanent, no retry.
    SafetyRefusal,
    /// Invalid payload or requirements. Permanent, no retry.
    MalformedJob,
    /// Worker died mid-job; the janitor requeues with incremented attempts.
    WorkerCrash,
    /// User or workflow cancellation. Terminal, no retry.
    Cancelled,
}

impl FailureKind {
    /// Whether this failure kind permits another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ResourceExhaustion | Self::RateLimit | Self::TransientNetwork | Self::WorkerCrash
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ResourceExhaustion => "resource_exhaustion",
            Self::RateLimit => "rate_limit",
            Self::TransientNetwork => "transient_network",
            Self::SafetyRefusal => "safety_refusal",
            Self::MalformedJob => "malformed_job",
            Self::WorkerCrash => "worker_crash",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "resource_exhaustion" => Some(Self::ResourceExhaustion),
            "rate_limit" => Some(Self::RateLimit),
            "transient_network" => Some(Self::TransientNetwork),
            "safety_refusal" => Some(Self::SafetyRefusal),
            "malformed_job" => Some(Self::MalformedJob),
            "worker_crash" => Some(Self::WorkerCrash),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Best-effort classification of an unstructured error message.
    ///
    /// Connectors that surface typed errors never reach this path; it is
    /// the fallback for opaque backend failures.
    pub fn classify_message(message: &str) -> Self {
        let lower = message.to_lowercase();

        if lower.contains("out of memory")
            || lower.contains("oom")
            || lower.contains("cuda")
            || lower.contains("vram")
            || lower.contains("no space left")
        {
            Self::ResourceExhaustion
        } else if lower.contains("429")
            || lower.contains("rate limit")
            || lower.contains("too many requests")
            || lower.contains("quota")
            || lower.contains("throttl")
        {
            Self::RateLimit
        } else if lower.contains("content policy")
            || lower.contains("safety")
            || lower.contains("refused by moderation")
            || lower.contains("nsfw")
        {
            Self::SafetyRefusal
        } else if lower.contains("invalid payload")
            || lower.contains("malformed")
            || lower.contains("validation")
            || lower.contains("400")
        {
            Self::MalformedJob
        } else if lower.contains("cancel") {
            Self::Cancelled
        } else {
            // Timeouts, resets, 5xx and anything unrecognized: assume the
            // backend will recover.
            Self::TransientNetwork
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
