//! Management REST surface, mounted under `/api`.

pub mod jobs;
pub mod system;

use crate::state::AppState;
use axum::Router;
use axum::routing::{get, post};
use domain_webhooks::{WebhookApiState, webhook_router};

pub fn api_router(state: AppState) -> Router {
    let webhook_state = WebhookApiState {
        store: state.webhook_store.clone(),
        engine: state.webhook_engine.clone(),
    };

    Router::new()
        .route("/jobs", post(jobs::submit_job).get(jobs::list_jobs))
        .route("/jobs/sync", post(jobs::sync_all_jobs))
        .route("/jobs/{id}", get(jobs::get_job))
        .route("/jobs/{id}/cancel", post(jobs::cancel_job))
        .route("/jobs/{id}/retry", post(jobs::retry_job))
        .route("/jobs/{id}/sync", post(jobs::sync_job))
        .route("/jobs/{id}/forensics", get(jobs::job_forensics))
        .route("/workflows/{id}/forensics", get(jobs::workflow_forensics))
        .route("/workers", get(system::list_workers))
        .route("/metrics", get(system::system_metrics))
        .with_state(state)
        .merge(webhook_router(webhook_state))
}
