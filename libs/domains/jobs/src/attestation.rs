//! Append-only attestation records.
//!
//! Every terminal transition leaves an attestation under the canonical
//! key shapes in [`crate::keys`], keyed so forensic tooling can find the
//! full history of a job or workflow by prefix. Records are written with
//! `SET NX`: once a key exists it is never rewritten, only expired by TTL.

use crate::config::QueueConfig;
use crate::error::{FailureKind, JobError};
use crate::keys;
use crate::models::{Job, now_ms};
use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Kind of audit record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttestationKind {
    FailureRetry,
    FailurePermanent,
    Completion,
    WorkflowFailure,
}

impl AttestationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FailureRetry => "failure_retry",
            Self::FailurePermanent => "failure_permanent",
            Self::Completion => "completion",
            Self::WorkflowFailure => "workflow_failure",
        }
    }
}

/// One immutable audit entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attestation {
    pub attestation_type: AttestationKind,
    pub job_id: String,
    pub worker_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<String>,
    /// When the attested transition happened, epoch ms.
    pub timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_kind: Option<FailureKind>,
    pub retry_count: u32,
    pub will_retry: bool,
    /// Human-readable note on what this means for the enclosing workflow.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow_impact: Option<String>,
}

impl Attestation {
    pub fn completion(job: &Job, worker_id: &str) -> Self {
        Self {
            attestation_type: AttestationKind::Completion,
            job_id: job.id.clone(),
            worker_id: worker_id.to_string(),
            workflow_id: job.workflow_id.clone(),
            timestamp: now_ms(),
            error: None,
            failure_kind: None,
            retry_count: job.retry_count,
            will_retry: false,
            workflow_impact: None,
        }
    }

    pub fn failure(
        job: &Job,
        worker_id: &str,
        error: &str,
        kind: FailureKind,
        will_retry: bool,
    ) -> Self {
        let workflow_impact = job.workflow_id.as_ref().map(|wf| {
            if will_retry {
                format!("workflow {} step delayed by retry", wf)
            } else {
                format!("workflow {} blocked by permanent step failure", wf)
            }
        });
        Self {
            attestation_type: if will_retry {
                AttestationKind::FailureRetry
            } else {
                AttestationKind::FailurePermanent
            },
            job_id: job.id.clone(),
            worker_id: worker_id.to_string(),
            workflow_id: job.workflow_id.clone(),
            timestamp: now_ms(),
            error: Some(error.to_string()),
            failure_kind: Some(kind),
            retry_count: job.retry_count,
            will_retry,
            workflow_impact,
        }
    }
}

/// Writer for attestation keys.
#[derive(Clone)]
pub struct AttestationWriter {
    redis: ConnectionManager,
    ttl_secs: u64,
}

impl AttestationWriter {
    pub fn new(redis: ConnectionManager, config: &QueueConfig) -> Self {
        Self {
            redis,
            ttl_secs: config.attestation_ttl_secs,
        }
    }

    /// Record a completion. Keyed by the attempt that completed, so a job
    /// that succeeded after retries keeps its failure history alongside.
    pub async fn record_completion(&self, job: &Job, worker_id: &str) -> Result<(), JobError> {
        let attestation = Attestation::completion(job, worker_id);
        let key = keys::completion_attestation(job.workflow_id.as_deref(), &job.id, job.retry_count);
        self.write(&key, &attestation).await
    }

    /// Record a failure. Retryable failures are keyed per attempt;
    /// permanent ones get the `permanent` key, and workflow-level failure
    /// records are written alongside when the job belongs to a workflow.
    pub async fn record_failure(
        &self,
        job: &Job,
        worker_id: &str,
        error: &str,
        kind: FailureKind,
        will_retry: bool,
    ) -> Result<(), JobError> {
        let attestation = Attestation::failure(job, worker_id, error, kind, will_retry);
        let workflow_id = job.workflow_id.as_deref();

        let key = if will_retry {
            keys::failure_attestation_attempt(workflow_id, &job.id, job.retry_count)
        } else {
            keys::failure_attestation_permanent(workflow_id, &job.id)
        };
        self.write(&key, &attestation).await?;

        if let Some(workflow_id) = workflow_id {
            let mut workflow_record = attestation.clone();
            workflow_record.attestation_type = AttestationKind::WorkflowFailure;
            let workflow_key = if will_retry {
                keys::workflow_failure_attempt(workflow_id, job.retry_count)
            } else {
                keys::workflow_failure_permanent(workflow_id)
            };
            self.write(&workflow_key, &workflow_record).await?;
        }

        Ok(())
    }

    /// `SET NX` + TTL. An existing key is left untouched: attestations
    /// are append-only and the first write wins.
    async fn write(&self, key: &str, attestation: &Attestation) -> Result<(), JobError> {
        let mut conn = self.redis.clone();
        let payload = serde_json::to_string(attestation)?;

        let created: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(&payload)
            .arg("NX")
            .arg("EX")
            .arg(self.ttl_secs)
            .query_async(&mut conn)
            .await?;

        if created.is_some() {
            debug!(key = %key, kind = %attestation.attestation_type.as_str(), "Attestation written");
        } else {
            warn!(key = %key, "Attestation key already present, leaving original");
        }
        Ok(())
    }
}
