//! Canonical Redis key layout.
//!
//! The key shapes are a contract: forensic tooling locates attestations by
//! the `workflow-{wf}` / `job-{id}` segment structure, and external clients
//! read records directly (`HGETALL job:{id}`, `ZREVRANGE jobs:pending`).
//! Every key in the system is built here and nowhere else.

/// Sorted set of pending job ids, scored by the packed priority key.
pub const PENDING_INDEX: &str = "jobs:pending";

/// Counter of completed jobs across the cluster.
pub const COMPLETED_COUNT: &str = "jobs:completed:count";

/// Counter of permanently failed jobs across the cluster.
pub const FAILED_COUNT: &str = "jobs:failed:count";

/// Workflow segment used for jobs that belong to no workflow.
pub const NO_WORKFLOW: &str = "none";

pub fn job(job_id: &str) -> String {
    format!("job:{}", job_id)
}

/// Immutable snapshot of a record taken before a manual retry.
pub fn job_backup(job_id: &str, attempt: u32) -> String {
    format!("job:{}:backup:{}", job_id, attempt)
}

/// Cancellation marker observed by the owning worker between progress ticks.
pub fn job_cancel(job_id: &str) -> String {
    format!("job:cancel:{}", job_id)
}

pub fn active_jobs(worker_id: &str) -> String {
    format!("jobs:active:{}", worker_id)
}

pub fn worker(worker_id: &str) -> String {
    format!("worker:{}", worker_id)
}

pub fn progress(job_id: &str) -> String {
    format!("progress:{}", job_id)
}

fn workflow_segment(workflow_id: Option<&str>) -> &str {
    workflow_id.unwrap_or(NO_WORKFLOW)
}

/// `worker:failure:workflow-{wf}:job-{id}:attempt:{n}`
pub fn failure_attestation_attempt(
    workflow_id: Option<&str>,
    job_id: &str,
    attempt: u32,
) -> String {
    format!(
        "worker:failure:workflow-{}:job-{}:attempt:{}",
        workflow_segment(workflow_id),
        job_id,
        attempt
    )
}

/// `worker:failure:workflow-{wf}:job-{id}:permanent`
pub fn failure_attestation_permanent(workflow_id: Option<&str>, job_id: &str) -> String {
    format!(
        "worker:failure:workflow-{}:job-{}:permanent",
        workflow_segment(workflow_id),
        job_id
    )
}

/// `worker:completion:workflow-{wf}:job-{id}:attempt:{n}`
pub fn completion_attestation(workflow_id: Option<&str>, job_id: &str, attempt: u32) -> String {
    format!(
        "worker:completion:workflow-{}:job-{}:attempt:{}",
        workflow_segment(workflow_id),
        job_id,
        attempt
    )
}

/// `workflow:failure:{wf}:attempt:{n}`
pub fn workflow_failure_attempt(workflow_id: &str, attempt: u32) -> String {
    format!("workflow:failure:{}:attempt:{}", workflow_id, attempt)
}

/// `workflow:failure:{wf}:permanent`
pub fn workflow_failure_permanent(workflow_id: &str) -> String {
    format!("workflow:failure:{}:permanent", workflow_id)
}

/// SCAN pattern for all attestations of one job. This is the load-bearing
/// prefix search: matching on the structured segments, not on a bare
/// substring of the job id.
pub fn job_attestation_pattern(kind: &str, workflow_id: Option<&str>, job_id: &str) -> String {
    format!(
        "worker:{}:workflow-{}:job-{}:*",
        kind,
        workflow_segment(workflow_id),
        job_id
    )
}

/// SCAN pattern for all worker attestations of one workflow.
pub fn workflow_attestation_pattern(kind: &str, workflow_id: &str) -> String {
    format!("worker:{}:workflow-{}:*", kind, workflow_id)
}

/// SCAN pattern for workflow-level failure attestations.
pub fn workflow_failure_pattern(workflow_id: &str) -> String {
    format!("workflow:failure:{}:*", workflow_id)
}

/// SCAN pattern for retry backups of one job.
pub fn job_backup_pattern(job_id: &str) -> String {
    format!("job:{}:backup:*", job_id)
}
