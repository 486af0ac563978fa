//! Job submission and control endpoints.

use crate::state::AppState;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use axum_helpers::{ApiResponse, AppError};
use domain_jobs::events::{EventEnvelope, LifecycleEvent};
use domain_jobs::models::{Job, JobStatus, JobSubmission};
use domain_jobs::store::CancelOutcome;
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

/// Publish an event, logging rather than failing the request when the
/// bus is unreachable (the canonical record is already written).
async fn emit(state: &AppState, event: LifecycleEvent) {
    if let Err(e) = state.bus.publish(&EventEnvelope::new(event)).await {
        warn!(error = %e, "Failed to publish lifecycle event");
    }
}

fn job_submitted_event(job: &Job) -> LifecycleEvent {
    LifecycleEvent::JobSubmitted {
        job_id: job.id.clone(),
        service_required: job.service_required.clone(),
        priority: job.effective_priority,
        workflow_id: job.workflow_id.clone(),
        customer_id: job.customer_id.clone(),
    }
}

/// `POST /api/jobs`
pub async fn submit_job(
    State(state): State<AppState>,
    Json(submission): Json<JobSubmission>,
) -> Result<impl IntoResponse, AppError> {
    let job = state.store.submit(submission).await.map_err(AppError::from)?;
    metrics::counter!("hub_jobs_submitted_total").increment(1);
    emit(&state, job_submitted_event(&job)).await;
    Ok((StatusCode::CREATED, ApiResponse::ok(job)))
}

#[derive(Debug, Deserialize)]
pub struct ListJobsParams {
    pub status: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    100
}

/// `GET /api/jobs?status=&limit=`
pub async fn list_jobs(
    State(state): State<AppState>,
    Query(params): Query<ListJobsParams>,
) -> Result<ApiResponse<Vec<Job>>, AppError> {
    let status = params
        .status
        .as_deref()
        .map(|raw| {
            raw.parse::<JobStatus>()
                .map_err(|_| AppError::BadRequest(format!("unknown status '{}'", raw)))
        })
        .transpose()?;

    let jobs = state
        .store
        .list_jobs(status, params.limit.min(1_000))
        .await
        .map_err(AppError::from)?;
    Ok(ApiResponse::ok(jobs))
}

/// `GET /api/jobs/{id}`
pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<ApiResponse<Job>, AppError> {
    let job = state.store.require_job(&id).await.map_err(AppError::from)?;
    Ok(ApiResponse::ok(job))
}

/// `POST /api/jobs/{id}/cancel`
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<ApiResponse<Job>, AppError> {
    let outcome = state.store.cancel(&id).await.map_err(AppError::from)?;
    let job = match outcome {
        CancelOutcome::Cancelled(job) => {
            emit(
                &state,
                LifecycleEvent::JobStatusChanged {
                    job_id: job.id.clone(),
                    status: JobStatus::Cancelled,
                    worker_id: None,
                },
            )
            .await;
            job
        }
        CancelOutcome::Cancelling(job) => {
            emit(
                &state,
                LifecycleEvent::JobStatusChanged {
                    job_id: job.id.clone(),
                    status: JobStatus::Cancelling,
                    worker_id: job.worker_id.clone(),
                },
            )
            .await;
            job
        }
    };
    Ok(ApiResponse::ok(job))
}

/// `POST /api/jobs/{id}/retry`
pub async fn retry_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<ApiResponse<Job>, AppError> {
    let job = state.store.retry(&id).await.map_err(AppError::from)?;
    metrics::counter!("hub_jobs_retried_total").increment(1);
    emit(&state, job_submitted_event(&job)).await;
    Ok(ApiResponse::ok(job))
}

/// `POST /api/jobs/{id}/sync` - force a rebroadcast of one record.
pub async fn sync_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<ApiResponse<Job>, AppError> {
    let job = state.store.require_job(&id).await.map_err(AppError::from)?;
    emit(
        &state,
        LifecycleEvent::JobStatusChanged {
            job_id: job.id.clone(),
            status: job.status,
            worker_id: job.worker_id.clone(),
        },
    )
    .await;
    Ok(ApiResponse::ok(job))
}

/// `POST /api/jobs/sync` - rebroadcast every live record.
pub async fn sync_all_jobs(
    State(state): State<AppState>,
) -> Result<ApiResponse<serde_json::Value>, AppError> {
    let jobs = state
        .store
        .list_jobs(None, 1_000)
        .await
        .map_err(AppError::from)?;
    let count = jobs.len();
    for job in jobs {
        emit(
            &state,
            LifecycleEvent::JobStatusChanged {
                job_id: job.id.clone(),
                status: job.status,
                worker_id: job.worker_id.clone(),
            },
        )
        .await;
    }
    Ok(ApiResponse::ok(json!({ "synced": count })))
}

/// `GET /api/jobs/{id}/forensics`
pub async fn job_forensics(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<ApiResponse<domain_jobs::JobForensics>, AppError> {
    let forensics = state
        .forensics
        .investigate_job(&id)
        .await
        .map_err(AppError::from)?;
    Ok(ApiResponse::ok(forensics))
}

/// `GET /api/workflows/{id}/forensics`
pub async fn workflow_forensics(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<ApiResponse<domain_jobs::WorkflowForensics>, AppError> {
    let forensics = state
        .forensics
        .investigate_workflow(&id)
        .await
        .map_err(AppError::from)?;
    Ok(ApiResponse::ok(forensics))
}
