//! Worker registry and cluster metrics endpoints.

use crate::state::AppState;
use axum::extract::State;
use axum_helpers::{ApiResponse, AppError};
use domain_jobs::events::SystemStats;
use domain_jobs::models::WorkerInfo;

/// `GET /api/workers`
pub async fn list_workers(
    State(state): State<AppState>,
) -> Result<ApiResponse<Vec<WorkerInfo>>, AppError> {
    let workers = state.store.list_workers().await.map_err(AppError::from)?;
    Ok(ApiResponse::ok(workers))
}

/// `GET /api/metrics` - cluster counters for the monitor UI.
pub async fn system_metrics(
    State(state): State<AppState>,
) -> Result<ApiResponse<SystemStats>, AppError> {
    let stats = state.store.stats().await.map_err(AppError::from)?;
    Ok(ApiResponse::ok(stats))
}
