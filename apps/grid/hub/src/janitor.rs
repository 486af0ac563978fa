//! Stale-worker janitor.
//!
//! Periodically inspects worker heartbeats: workers quiet past the
//! warning age are logged, workers past the stale threshold are marked
//! offline and their still-assigned jobs go back to the pending index
//! with an incremented attempt count.

use crate::state::AppState;
use domain_jobs::events::{EventEnvelope, LifecycleEvent};
use domain_jobs::models::{JobStatus, WorkerStatus, now_ms};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

pub async fn run(state: AppState, mut shutdown: watch::Receiver<bool>) {
    let interval = Duration::from_secs(state.config.janitor_interval_secs);
    info!(
        interval_secs = state.config.janitor_interval_secs,
        stale_threshold_secs = state.config.queue.stale_threshold_secs,
        "Janitor started"
    );

    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
                continue;
            }
        }

        if let Err(e) = sweep(&state).await {
            error!(error = %e, "Janitor sweep failed");
        }
    }
    info!("Janitor stopped");
}

async fn sweep(state: &AppState) -> Result<(), domain_jobs::JobError> {
    let queue = &state.config.queue;

    // Early warning before the requeue threshold.
    let warning_cutoff = now_ms() - (queue.stale_warning_secs as i64 * 1_000);
    let stale_cutoff = now_ms() - (queue.stale_threshold_secs as i64 * 1_000);
    for worker in state.store.list_workers().await? {
        if worker.status == WorkerStatus::Offline {
            continue;
        }
        if worker.last_heartbeat < warning_cutoff && worker.last_heartbeat >= stale_cutoff {
            warn!(
                worker_id = %worker.worker_id,
                last_heartbeat = worker.last_heartbeat,
                "Worker heartbeat overdue"
            );
        }
    }

    let stale = state
        .store
        .stale_workers(queue.stale_threshold_secs)
        .await?;
    for worker in stale {
        warn!(
            worker_id = %worker.worker_id,
            last_heartbeat = worker.last_heartbeat,
            "Worker heartbeat lapsed, reclaiming its jobs"
        );
        metrics::counter!("hub_workers_expired_total").increment(1);

        state.store.mark_worker_offline(&worker.worker_id).await?;
        emit(
            state,
            LifecycleEvent::WorkerStatusChanged {
                worker_id: worker.worker_id.clone(),
                status: WorkerStatus::Offline,
                current_job_id: worker.current_job_id.clone(),
            },
        )
        .await;

        let requeued = state.store.requeue_orphaned_jobs(&worker.worker_id).await?;
        for job in requeued {
            metrics::counter!("hub_jobs_requeued_total").increment(1);
            emit(
                state,
                LifecycleEvent::JobStatusChanged {
                    job_id: job.id.clone(),
                    status: JobStatus::Pending,
                    worker_id: None,
                },
            )
            .await;
        }
    }

    debug!("Janitor sweep complete");
    Ok(())
}

async fn emit(state: &AppState, event: LifecycleEvent) {
    if let Err(e) = state.bus.publish(&EventEnvelope::new(event)).await {
        warn!(error = %e, "Janitor failed to publish event");
    }
}
