//! Redis data plane: canonical job and worker records.
//!
//! All mutations outside the matcher's claim path go through this store.
//! Matching-time mutations are atomic inside the Lua script; everything
//! here is single-writer (the submitting hub or the owning worker), so
//! plain pipelines are enough.

use crate::config::QueueConfig;
use crate::error::{FailureKind, JobError};
use crate::events::SystemStats;
use crate::keys;
use crate::models::{Job, JobStatus, JobSubmission, WorkerInfo, WorkerStatus, now_ms};
use crate::score::encode_score;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, info, instrument, warn};

/// Result of a cancellation request.
#[derive(Debug, Clone)]
pub enum CancelOutcome {
    /// The job was still pending and is now terminally cancelled.
    Cancelled(Job),
    /// The job is owned by a worker; cancellation was signalled and the
    /// owning worker performs the terminal reconciliation.
    Cancelling(Job),
}

/// Handle to the canonical Redis state.
#[derive(Clone)]
pub struct JobStore {
    redis: ConnectionManager,
    config: QueueConfig,
}

impl JobStore {
    pub fn new(redis: ConnectionManager, config: QueueConfig) -> Self {
        Self { redis, config }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn redis(&self) -> ConnectionManager {
        self.redis.clone()
    }

    // ------------------------------------------------------------------
    // Jobs
    // ------------------------------------------------------------------

    /// Validate and write a new job, inserting it into the pending index.
    #[instrument(skip(self, submission), fields(service = %submission.service_required))]
    pub async fn submit(&self, submission: JobSubmission) -> Result<Job, JobError> {
        if submission.service_required.trim().is_empty() {
            return Err(JobError::Validation(
                "service_required must not be empty".to_string(),
            ));
        }
        if let Some(id) = &submission.id {
            if id.trim().is_empty() {
                return Err(JobError::Validation("job id must not be empty".to_string()));
            }
            if self.get_job(id).await?.is_some() {
                return Err(JobError::Validation(format!("job '{}' already exists", id)));
            }
        }

        let job = submission.into_job(self.config.default_priority, self.config.default_max_retries);
        self.write_pending(&job).await?;

        info!(
            job_id = %job.id,
            service = %job.service_required,
            priority = %job.effective_priority,
            workflow_id = ?job.workflow_id,
            "Job submitted"
        );
        Ok(job)
    }

    /// Write a pending job record and index it. Shared by submission and
    /// every requeue path.
    async fn write_pending(&self, job: &Job) -> Result<(), JobError> {
        let mut conn = self.redis.clone();
        let key = keys::job(&job.id);
        let fields = job.to_hash_fields()?;
        let score = encode_score(job.effective_priority, job.sort_datetime());

        redis::pipe()
            .atomic()
            .del(&key)
            .ignore()
            .hset_multiple(&key, &fields)
            .ignore()
            .zadd(keys::PENDING_INDEX, &job.id, score)
            .ignore()
            .exec_async(&mut conn)
            .await?;
        Ok(())
    }

    pub async fn get_job(&self, job_id: &str) -> Result<Option<Job>, JobError> {
        let mut conn = self.redis.clone();
        let key = keys::job(job_id);
        let map: HashMap<String, String> = conn.hgetall(&key).await?;
        if map.is_empty() {
            return Ok(None);
        }
        Job::from_hash(&key, &map).map(Some)
    }

    pub async fn require_job(&self, job_id: &str) -> Result<Job, JobError> {
        self.get_job(job_id)
            .await?
            .ok_or_else(|| JobError::NotFound(format!("job '{}'", job_id)))
    }

    /// Enumerate job records, optionally filtered by status. Scans the
    /// keyspace; intended for snapshots and operator views, not hot paths.
    pub async fn list_jobs(
        &self,
        status: Option<JobStatus>,
        limit: usize,
    ) -> Result<Vec<Job>, JobError> {
        let mut jobs = Vec::new();
        let keys = self.scan_keys("job:*", limit * 4).await?;
        for key in keys {
            // Skip backups and cancellation markers that share the prefix.
            if key.contains(":backup:") || key.starts_with("job:cancel:") {
                continue;
            }
            let mut conn = self.redis.clone();
            let map: HashMap<String, String> = conn.hgetall(&key).await?;
            if map.is_empty() {
                continue;
            }
            match Job::from_hash(&key, &map) {
                Ok(job) => {
                    if status.is_none_or(|s| job.status == s) {
                        jobs.push(job);
                        if jobs.len() >= limit {
                            break;
                        }
                    }
                }
                Err(e) => warn!(key = %key, error = %e, "Skipping unreadable job record"),
            }
        }
        Ok(jobs)
    }

    /// Remove a pending job from the index and mark it cancelled, or
    /// signal the owning worker for assigned/active jobs.
    #[instrument(skip(self))]
    pub async fn cancel(&self, job_id: &str) -> Result<CancelOutcome, JobError> {
        let mut job = self.require_job(job_id).await?;
        let mut conn = self.redis.clone();

        match job.status {
            JobStatus::Pending => {
                let removed: i64 = conn.zrem(keys::PENDING_INDEX, job_id).await?;
                if removed == 0 {
                    // Claimed between the read and the ZREM; fall through
                    // to the in-flight path on the fresh record.
                    job = self.require_job(job_id).await?;
                    return self.cancel_in_flight(job).await;
                }
                let now = now_ms();
                let _: () = conn
                    .hset_multiple(
                        keys::job(job_id),
                        &[
                            ("status", JobStatus::Cancelled.to_string()),
                            ("failed_at", now.to_string()),
                            ("failure_kind", FailureKind::Cancelled.as_str().to_string()),
                        ],
                    )
                    .await?;
                job.status = JobStatus::Cancelled;
                job.failed_at = Some(now);
                job.failure_kind = Some(FailureKind::Cancelled);
                info!(job_id = %job_id, "Cancelled pending job");
                Ok(CancelOutcome::Cancelled(job))
            }
            JobStatus::Assigned | JobStatus::Active => self.cancel_in_flight(job).await,
            status => Err(JobError::IllegalTransition {
                job_id: job_id.to_string(),
                status: status.to_string(),
                action: "cancel",
            }),
        }
    }

    async fn cancel_in_flight(&self, mut job: Job) -> Result<CancelOutcome, JobError> {
        if !matches!(job.status, JobStatus::Assigned | JobStatus::Active) {
            return Err(JobError::IllegalTransition {
                job_id: job.id.clone(),
                status: job.status.to_string(),
                action: "cancel",
            });
        }
        let mut conn = self.redis.clone();
        redis::pipe()
            .hset(keys::job(&job.id), "status", JobStatus::Cancelling.to_string())
            .ignore()
            .set_ex(
                keys::job_cancel(&job.id),
                now_ms(),
                self.config.cancel_marker_ttl_secs,
            )
            .ignore()
            .exec_async(&mut conn)
            .await?;
        job.status = JobStatus::Cancelling;
        info!(job_id = %job.id, worker_id = ?job.worker_id, "Cancellation signalled");
        Ok(CancelOutcome::Cancelling(job))
    }

    /// Whether a cancel marker exists for this job. Workers poll this
    /// between progress ticks.
    pub async fn cancel_requested(&self, job_id: &str) -> Result<bool, JobError> {
        let mut conn = self.redis.clone();
        Ok(conn.exists(keys::job_cancel(job_id)).await?)
    }

    pub async fn clear_cancel_marker(&self, job_id: &str) -> Result<(), JobError> {
        let mut conn = self.redis.clone();
        let _: () = conn.del(keys::job_cancel(job_id)).await?;
        Ok(())
    }

    /// Operator-initiated retry of a terminal job. Snapshots the current
    /// record as an immutable backup, then resets it to pending.
    #[instrument(skip(self))]
    pub async fn retry(&self, job_id: &str) -> Result<Job, JobError> {
        let job = self.require_job(job_id).await?;
        if !job.status.is_terminal() {
            return Err(JobError::IllegalTransition {
                job_id: job_id.to_string(),
                status: job.status.to_string(),
                action: "retry",
            });
        }

        // Immutable snapshot of the attempt being retried.
        let backup_key = keys::job_backup(job_id, job.retry_count);
        let backup_fields = job.to_hash_fields()?;
        let mut conn = self.redis.clone();
        redis::pipe()
            .hset_multiple(&backup_key, &backup_fields)
            .ignore()
            .expire(&backup_key, self.config.attestation_ttl_secs as i64)
            .ignore()
            .exec_async(&mut conn)
            .await?;

        let reset = self.reset_to_pending(job, true).await?;
        info!(job_id = %job_id, retry_count = %reset.retry_count, "Job reset for retry");
        Ok(reset)
    }

    /// Reset a job to pending, clearing its assignment and progress.
    /// Workflow identity and the effective sort key are preserved so the
    /// retried step rejoins its workflow's position in the queue.
    pub async fn reset_to_pending(
        &self,
        mut job: Job,
        increment_retry: bool,
    ) -> Result<Job, JobError> {
        if increment_retry {
            job.retry_count += 1;
        }
        job.status = JobStatus::Pending;
        job.worker_id = None;
        job.assigned_at = None;
        job.started_at = None;
        job.completed_at = None;
        job.progress = None;
        job.result = None;

        self.write_pending(&job).await?;
        Ok(job)
    }

    /// Transition an assigned job to active (worker began execution).
    pub async fn start_job(&self, job_id: &str) -> Result<Job, JobError> {
        let mut job = self.require_job(job_id).await?;
        if job.status != JobStatus::Assigned {
            return Err(JobError::IllegalTransition {
                job_id: job_id.to_string(),
                status: job.status.to_string(),
                action: "start",
            });
        }
        let now = now_ms();
        let mut conn = self.redis.clone();
        let _: () = conn
            .hset_multiple(
                keys::job(job_id),
                &[
                    ("status", JobStatus::Active.to_string()),
                    ("started_at", now.to_string()),
                ],
            )
            .await?;
        job.status = JobStatus::Active;
        job.started_at = Some(now);
        Ok(job)
    }

    /// Terminal success: record the result, release the worker slot and
    /// bump counters.
    #[instrument(skip(self, result))]
    pub async fn complete_job(
        &self,
        job_id: &str,
        worker_id: &str,
        result: Option<&Value>,
    ) -> Result<Job, JobError> {
        let mut job = self.require_job(job_id).await?;
        let now = now_ms();
        let processing_ms = job.started_at.map(|s| (now - s).max(0)).unwrap_or(0);

        let mut fields = vec![
            ("status".to_string(), JobStatus::Completed.to_string()),
            ("completed_at".to_string(), now.to_string()),
            ("progress".to_string(), "100".to_string()),
        ];
        if let Some(result) = result {
            fields.push(("result".to_string(), serde_json::to_string(result)?));
        }

        let mut conn = self.redis.clone();
        redis::pipe()
            .hset_multiple(keys::job(job_id), &fields)
            .ignore()
            .hdel(keys::active_jobs(worker_id), job_id)
            .ignore()
            .incr(keys::COMPLETED_COUNT, 1)
            .ignore()
            .exec_async(&mut conn)
            .await?;

        self.release_worker_slot(worker_id, true, processing_ms as u64)
            .await?;

        job.status = JobStatus::Completed;
        job.completed_at = Some(now);
        job.progress = Some(100);
        job.result = result.cloned();
        debug!(job_id = %job_id, worker_id = %worker_id, "Job completed");
        Ok(job)
    }

    /// Terminal (or retried) failure. When `will_retry` the job is reset
    /// to pending with an incremented attempt count; otherwise it stays
    /// failed with the error attached.
    #[instrument(skip(self, error))]
    pub async fn fail_job(
        &self,
        job_id: &str,
        worker_id: Option<&str>,
        error: &str,
        kind: FailureKind,
        will_retry: bool,
    ) -> Result<Job, JobError> {
        let mut job = self.require_job(job_id).await?;
        let now = now_ms();
        let processing_ms = job.started_at.map(|s| (now - s).max(0)).unwrap_or(0);
        job.failure_count += 1;

        let mut conn = self.redis.clone();
        if let Some(worker_id) = worker_id {
            let _: () = conn.hdel(keys::active_jobs(worker_id), job_id).await?;
            self.release_worker_slot(worker_id, false, processing_ms as u64)
                .await?;
        }

        if will_retry {
            job.error = Some(error.to_string());
            job.failure_kind = Some(kind);
            job.failed_at = Some(now);
            let job = self.reset_to_pending(job, true).await?;
            info!(
                job_id = %job_id,
                retry_count = %job.retry_count,
                kind = %kind,
                "Job failed, requeued for retry"
            );
            Ok(job)
        } else {
            let fields = vec![
                ("status".to_string(), JobStatus::Failed.to_string()),
                ("failed_at".to_string(), now.to_string()),
                ("error".to_string(), error.to_string()),
                ("failure_kind".to_string(), kind.as_str().to_string()),
                ("failure_count".to_string(), job.failure_count.to_string()),
            ];
            redis::pipe()
                .hset_multiple(keys::job(job_id), &fields)
                .ignore()
                // A job failed while still pending must also leave the
                // index, or invariant "pending iff indexed" breaks.
                .zrem(keys::PENDING_INDEX, job_id)
                .ignore()
                .incr(keys::FAILED_COUNT, 1)
                .ignore()
                .exec_async(&mut conn)
                .await?;
            job.status = JobStatus::Failed;
            job.failed_at = Some(now);
            job.error = Some(error.to_string());
            job.failure_kind = Some(kind);
            warn!(job_id = %job_id, kind = %kind, "Job failed permanently");
            Ok(job)
        }
    }

    /// Mark a cancelling/in-flight job terminally cancelled.
    pub async fn finish_cancelled(&self, job_id: &str, worker_id: &str) -> Result<Job, JobError> {
        let mut job = self.require_job(job_id).await?;
        let now = now_ms();
        let mut conn = self.redis.clone();
        redis::pipe()
            .hset_multiple(
                keys::job(job_id),
                &[
                    ("status".to_string(), JobStatus::Cancelled.to_string()),
                    ("failed_at".to_string(), now.to_string()),
                    (
                        "failure_kind".to_string(),
                        FailureKind::Cancelled.as_str().to_string(),
                    ),
                ],
            )
            .ignore()
            .hdel(keys::active_jobs(worker_id), job_id)
            .ignore()
            .del(keys::job_cancel(job_id))
            .ignore()
            .exec_async(&mut conn)
            .await?;
        self.release_worker_slot(worker_id, false, 0).await?;
        job.status = JobStatus::Cancelled;
        job.failed_at = Some(now);
        job.failure_kind = Some(FailureKind::Cancelled);
        Ok(job)
    }

    /// Pending index snapshot, highest score first.
    pub async fn pending_snapshot(&self, limit: usize) -> Result<Vec<(String, f64)>, JobError> {
        let mut conn = self.redis.clone();
        let entries: Vec<(String, f64)> = redis::cmd("ZREVRANGE")
            .arg(keys::PENDING_INDEX)
            .arg(0)
            .arg(limit as i64 - 1)
            .arg("WITHSCORES")
            .query_async(&mut conn)
            .await?;
        Ok(entries)
    }

    pub async fn pending_count(&self) -> Result<u64, JobError> {
        let mut conn = self.redis.clone();
        Ok(conn.zcard(keys::PENDING_INDEX).await?)
    }

    // ------------------------------------------------------------------
    // Workers
    // ------------------------------------------------------------------

    /// Register (or re-register) a worker record.
    pub async fn register_worker(&self, worker: &WorkerInfo) -> Result<(), JobError> {
        let mut conn = self.redis.clone();
        let key = keys::worker(&worker.worker_id);
        let fields = worker.to_hash_fields()?;
        redis::pipe()
            .atomic()
            .del(&key)
            .ignore()
            .hset_multiple(&key, &fields)
            .ignore()
            .exec_async(&mut conn)
            .await?;
        info!(
            worker_id = %worker.worker_id,
            machine_id = %worker.machine_id,
            services = ?worker.services,
            "Worker registered"
        );
        Ok(())
    }

    pub async fn deregister_worker(&self, worker_id: &str) -> Result<(), JobError> {
        let mut conn = self.redis.clone();
        let _: () = conn.del(keys::worker(worker_id)).await?;
        info!(worker_id = %worker_id, "Worker deregistered");
        Ok(())
    }

    pub async fn get_worker(&self, worker_id: &str) -> Result<Option<WorkerInfo>, JobError> {
        let mut conn = self.redis.clone();
        let key = keys::worker(worker_id);
        let map: HashMap<String, String> = conn.hgetall(&key).await?;
        if map.is_empty() {
            return Ok(None);
        }
        WorkerInfo::from_hash(&key, &map).map(Some)
    }

    /// Enumerate worker records. Attestation keys share the `worker:`
    /// prefix and are filtered out by their kind segment.
    pub async fn list_workers(&self) -> Result<Vec<WorkerInfo>, JobError> {
        let mut workers = Vec::new();
        for key in self.scan_keys("worker:*", 10_000).await? {
            if key.starts_with("worker:failure:") || key.starts_with("worker:completion:") {
                continue;
            }
            let mut conn = self.redis.clone();
            let map: HashMap<String, String> = conn.hgetall(&key).await?;
            if map.is_empty() {
                continue;
            }
            match WorkerInfo::from_hash(&key, &map) {
                Ok(worker) => workers.push(worker),
                Err(e) => warn!(key = %key, error = %e, "Skipping unreadable worker record"),
            }
        }
        Ok(workers)
    }

    /// Refresh a worker's liveness timestamp and status.
    pub async fn heartbeat(&self, worker_id: &str, status: WorkerStatus) -> Result<(), JobError> {
        let mut conn = self.redis.clone();
        let _: () = conn
            .hset_multiple(
                keys::worker(worker_id),
                &[
                    ("last_heartbeat", now_ms().to_string()),
                    ("status", status.to_string()),
                ],
            )
            .await?;
        Ok(())
    }

    /// Release the worker's slot after a job finishes, updating counters.
    async fn release_worker_slot(
        &self,
        worker_id: &str,
        completed: bool,
        processing_ms: u64,
    ) -> Result<(), JobError> {
        let mut conn = self.redis.clone();
        let key = keys::worker(worker_id);
        let counter = if completed { "jobs_completed" } else { "jobs_failed" };
        redis::pipe()
            .hset(&key, "status", WorkerStatus::Idle.to_string())
            .ignore()
            .hdel(&key, "current_job_id")
            .ignore()
            .cmd("HINCRBY")
            .arg(&key)
            .arg(counter)
            .arg(1)
            .ignore()
            .cmd("HINCRBY")
            .arg(&key)
            .arg("total_processing_time")
            .arg(processing_ms)
            .ignore()
            .exec_async(&mut conn)
            .await?;
        Ok(())
    }

    /// Workers whose heartbeat is older than `threshold_secs`.
    pub async fn stale_workers(&self, threshold_secs: u64) -> Result<Vec<WorkerInfo>, JobError> {
        let cutoff = now_ms() - (threshold_secs as i64 * 1_000);
        let workers = self.list_workers().await?;
        Ok(workers
            .into_iter()
            .filter(|w| w.status != WorkerStatus::Offline && w.last_heartbeat < cutoff)
            .collect())
    }

    pub async fn mark_worker_offline(&self, worker_id: &str) -> Result<(), JobError> {
        let mut conn = self.redis.clone();
        let _: () = conn
            .hset(
                keys::worker(worker_id),
                "status",
                WorkerStatus::Offline.to_string(),
            )
            .await?;
        warn!(worker_id = %worker_id, "Worker marked offline");
        Ok(())
    }

    /// Jobs currently assigned to a worker (from its active set).
    pub async fn active_jobs(&self, worker_id: &str) -> Result<Vec<Job>, JobError> {
        let mut conn = self.redis.clone();
        let entries: HashMap<String, String> =
            conn.hgetall(keys::active_jobs(worker_id)).await?;
        let mut jobs = Vec::with_capacity(entries.len());
        for (job_id, _) in entries {
            // The hash value is a claim-time snapshot; the live record is
            // authoritative.
            if let Some(job) = self.get_job(&job_id).await? {
                jobs.push(job);
            }
        }
        Ok(jobs)
    }

    /// Return every job still assigned to a dead worker to the pending
    /// index with an incremented attempt count. Used by the hub janitor.
    pub async fn requeue_orphaned_jobs(&self, worker_id: &str) -> Result<Vec<Job>, JobError> {
        let orphans = self.active_jobs(worker_id).await?;
        let mut requeued = Vec::with_capacity(orphans.len());
        let mut conn = self.redis.clone();

        for mut job in orphans {
            if !matches!(job.status, JobStatus::Assigned | JobStatus::Active) {
                continue;
            }
            job.error = Some("worker heartbeat lapsed mid-job".to_string());
            job.failure_kind = Some(FailureKind::WorkerCrash);
            job.failure_count += 1;
            let job = self.reset_to_pending(job, true).await?;
            warn!(
                job_id = %job.id,
                worker_id = %worker_id,
                retry_count = %job.retry_count,
                "Requeued orphaned job"
            );
            requeued.push(job);
        }

        let _: () = conn.del(keys::active_jobs(worker_id)).await?;
        Ok(requeued)
    }

    // ------------------------------------------------------------------
    // Stats
    // ------------------------------------------------------------------

    pub async fn stats(&self) -> Result<SystemStats, JobError> {
        let mut conn = self.redis.clone();
        let pending = self.pending_count().await?;
        let completed_total: Option<u64> = conn.get(keys::COMPLETED_COUNT).await?;
        let failed_total: Option<u64> = conn.get(keys::FAILED_COUNT).await?;

        let workers = self.list_workers().await?;
        let mut stats = SystemStats {
            pending_jobs: pending,
            completed_total: completed_total.unwrap_or(0),
            failed_total: failed_total.unwrap_or(0),
            workers_total: workers.len() as u64,
            ..Default::default()
        };
        for worker in &workers {
            match worker.status {
                WorkerStatus::Idle => stats.workers_idle += 1,
                WorkerStatus::Busy => {
                    stats.workers_busy += 1;
                    stats.active_jobs += 1;
                }
                WorkerStatus::Offline => stats.workers_offline += 1,
                WorkerStatus::Error => {}
            }
        }
        Ok(stats)
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    /// Cursor-paginated SCAN; stops once `max_keys` keys are collected.
    pub(crate) async fn scan_keys(
        &self,
        pattern: &str,
        max_keys: usize,
    ) -> Result<Vec<String>, JobError> {
        let mut conn = self.redis.clone();
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;

        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(200)
                .query_async(&mut conn)
                .await?;
            keys.extend(batch);
            if next == 0 || keys.len() >= max_keys {
                break;
            }
            cursor = next;
        }

        keys.truncate(max_keys);
        Ok(keys)
    }
}
