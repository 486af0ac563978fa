//! Shared hub state.

use crate::broadcast::{Broadcaster, FullStateSnapshot, SnapshotJobs};
use crate::config::HubConfig;
use domain_jobs::models::{JobStatus, now_ms};
use domain_jobs::{EventBus, ForensicsService, JobError, JobStore};
use domain_webhooks::{DeliveryEngine, WebhookStore};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub store: JobStore,
    pub forensics: ForensicsService,
    pub bus: EventBus,
    pub broadcaster: Broadcaster,
    pub webhook_store: WebhookStore,
    pub webhook_engine: DeliveryEngine,
    pub config: Arc<HubConfig>,
}

impl AppState {
    /// Assemble the full cluster snapshot served to monitors.
    pub async fn snapshot(&self) -> Result<FullStateSnapshot, JobError> {
        let workers = self.store.list_workers().await?;
        let stats = self.store.stats().await?;

        let mut jobs = SnapshotJobs::default();
        for job in self.store.list_jobs(None, 1_000).await? {
            match job.status {
                JobStatus::Pending => jobs.pending.push(job),
                JobStatus::Assigned => jobs.assigned.push(job),
                JobStatus::Active => jobs.active.push(job),
                JobStatus::Completed => jobs.completed.push(job),
                JobStatus::Failed | JobStatus::Unworkable => jobs.failed.push(job),
                JobStatus::Cancelled | JobStatus::Cancelling => jobs.cancelled.push(job),
            }
        }
        jobs.pending
            .sort_by_key(|j| std::cmp::Reverse(j.effective_priority));

        Ok(FullStateSnapshot {
            r#type: "full_state_snapshot".to_string(),
            timestamp: now_ms(),
            workers,
            jobs,
            stats,
        })
    }
}
