//! Job execution: connector runs, progress pumping, terminal reporting.

use crate::config::WorkerConfig;
use connectors::{Connector, ConnectorError, ExecutionContext};
use domain_jobs::error::FailureKind;
use domain_jobs::events::{EventEnvelope, LifecycleEvent};
use domain_jobs::models::{Job, JobStatus};
use domain_jobs::progress::{ProgressPublisher, ProgressThrottle, ProgressUpdate};
use domain_jobs::{AttestationWriter, EventBus, JobStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, instrument, warn};

/// Executes one claimed job at a time and reports its terminal state.
#[derive(Clone)]
pub struct JobExecutor {
    store: JobStore,
    progress: ProgressPublisher,
    attestations: AttestationWriter,
    bus: EventBus,
    config: Arc<WorkerConfig>,
}

impl JobExecutor {
    pub fn new(
        store: JobStore,
        progress: ProgressPublisher,
        attestations: AttestationWriter,
        bus: EventBus,
        config: Arc<WorkerConfig>,
    ) -> Self {
        Self {
            store,
            progress,
            attestations,
            bus,
            config,
        }
    }

    /// Run a claimed job through its connector. Consumes the claim: every
    /// path out of here leaves the job in a coherent terminal or requeued
    /// state.
    ///
    /// `shutdown_cancel` is the runtime's drain signal; flipping it
    /// cancels the connector the same way a user cancel does.
    #[instrument(skip(self, job, connector, shutdown_cancel), fields(job_id = %job.id))]
    pub async fn execute(
        &self,
        job: Job,
        connector: Arc<dyn Connector>,
        shutdown_cancel: watch::Receiver<bool>,
    ) {
        let worker_id = self.config.worker_id.clone();

        let job = match self.store.start_job(&job.id).await {
            Ok(job) => job,
            Err(e) => {
                // The claim exists but the record refused the transition
                // (e.g. cancelled between claim and start). Leave it be.
                warn!(error = %e, "Could not start claimed job");
                return;
            }
        };
        self.emit(LifecycleEvent::JobStatusChanged {
            job_id: job.id.clone(),
            status: JobStatus::Active,
            worker_id: Some(worker_id.clone()),
        })
        .await;

        // Progress pump: connector ticks -> throttle -> stream + event.
        let (progress_tx, progress_rx) = mpsc::channel::<ProgressUpdate>(32);
        let pump = tokio::spawn(progress_pump(
            progress_rx,
            self.progress.clone(),
            self.bus.clone(),
            ProgressThrottle::new(Duration::from_millis(
                self.store.config().progress_throttle_ms,
            )),
            job.id.clone(),
            worker_id.clone(),
        ));

        // Cancellation: runtime drain, or the cancel marker set by the hub.
        let draining = shutdown_cancel.clone();
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let marker_watch = tokio::spawn(watch_cancel_marker(
            self.store.clone(),
            job.id.clone(),
            cancel_tx.clone(),
            shutdown_cancel,
            Duration::from_millis(self.config.cancel_poll_ms),
        ));

        let ctx = ExecutionContext::new(&job.id, progress_tx, cancel_rx.clone());
        let grace = Duration::from_secs(self.config.cancel_grace_secs);
        let result = run_with_cancel_grace(connector.as_ref(), &job, &ctx, cancel_rx, grace).await;

        marker_watch.abort();
        drop(ctx);
        let _ = pump.await;

        match result {
            Ok(result) => self.report_success(&job, &worker_id, result).await,
            Err(RunOutcome::Cancelled { forced }) => {
                // A user cancel wins over a concurrent drain; only a pure
                // drain interruption requeues the job.
                let user_cancel = self.store.cancel_requested(&job.id).await.unwrap_or(false);
                if !user_cancel && *draining.borrow() {
                    self.report_shutdown_requeue(&job, &worker_id).await
                } else {
                    self.report_cancelled(&job, &worker_id, forced).await
                }
            }
            Err(RunOutcome::Failed(e)) => self.report_failure(&job, &worker_id, e).await,
        }
    }

    /// The worker is draining and the job did not finish inside the
    /// grace: write the shutdown attestation and hand the job back.
    async fn report_shutdown_requeue(&self, job: &Job, worker_id: &str) {
        metrics::counter!("worker_jobs_total", "outcome" => "requeued_on_shutdown").increment(1);
        info!(job_id = %job.id, "Requeueing in-flight job for shutdown");

        if let Err(e) = self
            .attestations
            .record_failure(
                job,
                worker_id,
                "worker shutting down with job in flight",
                FailureKind::WorkerCrash,
                true,
            )
            .await
        {
            error!(job_id = %job.id, error = %e, "Failed to write shutdown attestation");
        }

        match self
            .store
            .fail_job(
                &job.id,
                Some(worker_id),
                "worker shutting down with job in flight",
                FailureKind::WorkerCrash,
                true,
            )
            .await
        {
            Ok(_) => {
                self.emit(LifecycleEvent::JobStatusChanged {
                    job_id: job.id.clone(),
                    status: JobStatus::Pending,
                    worker_id: None,
                })
                .await;
            }
            Err(e) => error!(job_id = %job.id, error = %e, "Failed to requeue job on shutdown"),
        }
    }

    async fn report_success(&self, job: &Job, worker_id: &str, result: serde_json::Value) {
        let completed = match self
            .store
            .complete_job(&job.id, worker_id, Some(&result))
            .await
        {
            Ok(job) => job,
            Err(e) => {
                error!(job_id = %job.id, error = %e, "Failed to record completion");
                return;
            }
        };

        if let Err(e) = self.attestations.record_completion(&completed, worker_id).await {
            error!(job_id = %job.id, error = %e, "Failed to write completion attestation");
        }

        metrics::counter!("worker_jobs_total", "outcome" => "completed").increment(1);
        info!(job_id = %job.id, "Job completed");
        self.emit(LifecycleEvent::CompleteJob {
            job_id: job.id.clone(),
            worker_id: worker_id.to_string(),
            result: Some(result),
        })
        .await;
    }

    async fn report_cancelled(&self, job: &Job, worker_id: &str, forced: bool) {
        metrics::counter!("worker_jobs_total", "outcome" => "cancelled").increment(1);

        if let Err(e) = self
            .attestations
            .record_failure(
                job,
                worker_id,
                if forced { "cancelled_forced" } else { "cancelled" },
                FailureKind::Cancelled,
                false,
            )
            .await
        {
            error!(job_id = %job.id, error = %e, "Failed to write cancellation attestation");
        }

        if forced {
            // The connector ignored the signal past the grace period; the
            // run was abandoned and the job reports failed.
            warn!(job_id = %job.id, "Connector ignored cancel signal, force-terminated");
            match self
                .store
                .fail_job(
                    &job.id,
                    Some(worker_id),
                    "cancelled_forced",
                    FailureKind::Cancelled,
                    false,
                )
                .await
            {
                Ok(_) => {
                    self.emit(LifecycleEvent::JobFailed {
                        job_id: job.id.clone(),
                        worker_id: Some(worker_id.to_string()),
                        error: "cancelled_forced".to_string(),
                        failure_kind: FailureKind::Cancelled,
                        will_retry: false,
                    })
                    .await;
                }
                Err(e) => error!(job_id = %job.id, error = %e, "Failed to record forced cancel"),
            }
        } else {
            info!(job_id = %job.id, "Job cancelled");
            match self.store.finish_cancelled(&job.id, worker_id).await {
                Ok(_) => {
                    self.emit(LifecycleEvent::JobStatusChanged {
                        job_id: job.id.clone(),
                        status: JobStatus::Cancelled,
                        worker_id: Some(worker_id.to_string()),
                    })
                    .await;
                }
                Err(e) => error!(job_id = %job.id, error = %e, "Failed to record cancellation"),
            }
        }
    }

    async fn report_failure(&self, job: &Job, worker_id: &str, err: ConnectorError) {
        let kind = err.failure_kind();
        let message = err.to_string();
        let will_retry = kind.is_retryable() && job.retry_count < job.max_retries;

        metrics::counter!("worker_jobs_total", "outcome" => "failed").increment(1);
        warn!(
            job_id = %job.id,
            kind = %kind,
            will_retry = will_retry,
            error = %message,
            "Job failed"
        );

        if let Err(e) = self
            .attestations
            .record_failure(job, worker_id, &message, kind, will_retry)
            .await
        {
            error!(job_id = %job.id, error = %e, "Failed to write failure attestation");
        }

        match self
            .store
            .fail_job(&job.id, Some(worker_id), &message, kind, will_retry)
            .await
        {
            Ok(_) => {
                self.emit(LifecycleEvent::JobFailed {
                    job_id: job.id.clone(),
                    worker_id: Some(worker_id.to_string()),
                    error: message,
                    failure_kind: kind,
                    will_retry,
                })
                .await;
            }
            Err(e) => error!(job_id = %job.id, error = %e, "Failed to record failure"),
        }
    }

    async fn emit(&self, event: LifecycleEvent) {
        if let Err(e) = self.bus.publish(&EventEnvelope::new(event)).await {
            // Events are observability, not correctness; log and move on.
            warn!(error = %e, "Failed to publish lifecycle event");
        }
    }
}

/// Why a run ended without a result.
enum RunOutcome {
    Cancelled { forced: bool },
    Failed(ConnectorError),
}

/// Drive the connector, force-terminating `grace` after a cancel signal
/// the connector fails to observe.
async fn run_with_cancel_grace(
    connector: &dyn Connector,
    job: &Job,
    ctx: &ExecutionContext,
    mut cancel_rx: watch::Receiver<bool>,
    grace: Duration,
) -> Result<serde_json::Value, RunOutcome> {
    let run = connector.execute(job, ctx);
    tokio::pin!(run);

    let deadline = async {
        loop {
            if *cancel_rx.borrow() {
                break;
            }
            if cancel_rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
        tokio::time::sleep(grace).await;
    };
    tokio::pin!(deadline);

    tokio::select! {
        result = &mut run => match result {
            Ok(value) => Ok(value),
            Err(ConnectorError::Cancelled) => Err(RunOutcome::Cancelled { forced: false }),
            Err(e) => Err(RunOutcome::Failed(e)),
        },
        _ = &mut deadline => {
            let _ = connector.cancel(&job.id).await;
            Err(RunOutcome::Cancelled { forced: true })
        }
    }
}

/// Forward connector progress ticks into the stream and the event bus,
/// throttled at the source.
async fn progress_pump(
    mut rx: mpsc::Receiver<ProgressUpdate>,
    publisher: ProgressPublisher,
    bus: EventBus,
    mut throttle: ProgressThrottle,
    job_id: String,
    worker_id: String,
) {
    while let Some(update) = rx.recv().await {
        if !throttle.admit(update.percent) {
            continue;
        }

        if let Err(e) = publisher.publish(&job_id, &worker_id, &update).await {
            warn!(job_id = %job_id, error = %e, "Failed to persist progress tick");
            continue;
        }

        let event = EventEnvelope::new(LifecycleEvent::UpdateJobProgress {
            job_id: job_id.clone(),
            worker_id: worker_id.clone(),
            progress: update.percent,
            message: update.message.clone(),
            current_step: update.current_step,
            total_steps: update.total_steps,
        });
        if let Err(e) = bus.publish(&event).await {
            warn!(job_id = %job_id, error = %e, "Failed to publish progress event");
        }
    }
}

/// Flip the per-job cancel signal when the hub sets the cancel marker or
/// the runtime starts draining.
async fn watch_cancel_marker(
    store: JobStore,
    job_id: String,
    cancel_tx: watch::Sender<bool>,
    mut shutdown: watch::Receiver<bool>,
    poll_interval: Duration,
) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(poll_interval) => {
                match store.cancel_requested(&job_id).await {
                    Ok(true) => {
                        info!(job_id = %job_id, "Cancel marker observed");
                        let _ = cancel_tx.send(true);
                        return;
                    }
                    Ok(false) => {}
                    Err(e) => warn!(job_id = %job_id, error = %e, "Cancel marker check failed"),
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    let _ = cancel_tx.send(true);
                    return;
                }
            }
        }
    }
}
