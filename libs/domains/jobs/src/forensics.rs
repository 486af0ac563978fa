//! Forensic investigation of jobs and workflows.
//!
//! Answers "what happened to job J (part of workflow W)?" by assembling,
//! in order: the current record, the job's attestation chain, any
//! workflow-level attestations, the progress stream, and retry backups.
//!
//! Lookups go through the structured key prefixes
//! (`worker:failure:workflow-{W}:job-{J}:*` etc.) - searching by bare
//! job-id substring would miss records and is deliberately unsupported.

use crate::attestation::Attestation;
use crate::error::JobError;
use crate::keys;
use crate::models::Job;
use crate::progress::{ProgressEntry, ProgressPublisher};
use crate::store::JobStore;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{instrument, warn};

/// Everything known about one job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobForensics {
    pub job_id: String,
    pub workflow_id: Option<String>,
    /// The live record, when it still exists (attestations outlive it).
    pub job: Option<Job>,
    /// Per-attempt failure and completion records, oldest key first.
    pub attestations: Vec<Attestation>,
    /// Workflow-level failure records, when the job belongs to one.
    pub workflow_attestations: Vec<Attestation>,
    pub progress: Vec<ProgressEntry>,
    /// Snapshots taken before operator retries.
    pub retry_backups: Vec<Job>,
}

/// Everything known about one workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowForensics {
    pub workflow_id: String,
    /// Worker-level attestations across all steps.
    pub step_attestations: Vec<Attestation>,
    pub workflow_attestations: Vec<Attestation>,
}

/// Read-only investigation service over the data plane.
#[derive(Clone)]
pub struct ForensicsService {
    store: JobStore,
    progress: ProgressPublisher,
}

impl ForensicsService {
    pub fn new(store: JobStore) -> Self {
        let progress = ProgressPublisher::new(store.redis(), store.config());
        Self { store, progress }
    }

    /// Assemble the audit trail of one job.
    #[instrument(skip(self))]
    pub async fn investigate_job(&self, job_id: &str) -> Result<JobForensics, JobError> {
        let job = self.store.get_job(job_id).await?;
        let workflow_id = job.as_ref().and_then(|j| j.workflow_id.clone());
        let workflow = workflow_id.as_deref();

        let mut attestations = Vec::new();
        for kind in ["failure", "completion"] {
            let pattern = keys::job_attestation_pattern(kind, workflow, job_id);
            attestations.extend(self.read_attestations(&pattern).await?);
        }

        let workflow_attestations = match workflow {
            Some(workflow_id) => {
                self.read_attestations(&keys::workflow_failure_pattern(workflow_id))
                    .await?
            }
            None => Vec::new(),
        };

        let progress = self.progress.history(job_id, 1_000).await?;
        let retry_backups = self.read_backups(job_id).await?;

        if job.is_none() && attestations.is_empty() && progress.is_empty() {
            return Err(JobError::NotFound(format!(
                "no record or attestations for job '{}'",
                job_id
            )));
        }

        Ok(JobForensics {
            job_id: job_id.to_string(),
            workflow_id,
            job,
            attestations,
            workflow_attestations,
            progress,
            retry_backups,
        })
    }

    /// Assemble the audit trail of a whole workflow.
    #[instrument(skip(self))]
    pub async fn investigate_workflow(
        &self,
        workflow_id: &str,
    ) -> Result<WorkflowForensics, JobError> {
        let mut step_attestations = Vec::new();
        for kind in ["failure", "completion"] {
            let pattern = keys::workflow_attestation_pattern(kind, workflow_id);
            step_attestations.extend(self.read_attestations(&pattern).await?);
        }
        let workflow_attestations = self
            .read_attestations(&keys::workflow_failure_pattern(workflow_id))
            .await?;

        Ok(WorkflowForensics {
            workflow_id: workflow_id.to_string(),
            step_attestations,
            workflow_attestations,
        })
    }

    /// SCAN a key pattern and decode each value as an attestation,
    /// sorted by attested timestamp.
    async fn read_attestations(&self, pattern: &str) -> Result<Vec<Attestation>, JobError> {
        let keys = self.store.scan_keys(pattern, 1_000).await?;
        let mut attestations = Vec::with_capacity(keys.len());
        let mut conn = self.store.redis();

        for key in keys {
            let raw: Option<String> = conn.get(&key).await?;
            let Some(raw) = raw else { continue };
            match serde_json::from_str::<Attestation>(&raw) {
                Ok(attestation) => attestations.push(attestation),
                Err(e) => warn!(key = %key, error = %e, "Skipping undecodable attestation"),
            }
        }

        attestations.sort_by_key(|a| a.timestamp);
        Ok(attestations)
    }

    async fn read_backups(&self, job_id: &str) -> Result<Vec<Job>, JobError> {
        let keys = self
            .store
            .scan_keys(&keys::job_backup_pattern(job_id), 100)
            .await?;
        let mut backups = Vec::with_capacity(keys.len());
        let mut conn = self.store.redis();

        for key in keys {
            let map: HashMap<String, String> = conn.hgetall(&key).await?;
            if map.is_empty() {
                continue;
            }
            match Job::from_hash(&key, &map) {
                Ok(job) => backups.push(job),
                Err(e) => warn!(key = %key, error = %e, "Skipping unreadable retry backup"),
            }
        }

        backups.sort_by_key(|j| j.retry_count);
        Ok(backups)
    }
}
