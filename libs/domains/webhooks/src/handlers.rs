//! Management REST handlers for webhook registrations.
//!
//! Mounted by the hub under `/api`:
//! - `POST /webhooks`, `GET /webhooks`, `GET/PUT/DELETE /webhooks/{id}`
//! - `POST /webhooks/{id}/test` - synthetic event through the real path
//! - `GET /webhooks/{id}/deliveries` - delivery audit rows + stats

use crate::delivery::DeliveryEngine;
use crate::models::{CreateWebhook, UpdateWebhook, WebhookRegistration};
use crate::store::WebhookStore;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use axum_helpers::{ApiResponse, AppError};
use domain_jobs::events::{EventEnvelope, LifecycleEvent};
use serde::Deserialize;
use serde_json::json;
use validator::Validate;

#[derive(Clone)]
pub struct WebhookApiState {
    pub store: WebhookStore,
    pub engine: DeliveryEngine,
}

/// Register a webhook.
pub async fn create_webhook(
    State(state): State<WebhookApiState>,
    Json(input): Json<CreateWebhook>,
) -> Result<impl IntoResponse, AppError> {
    input
        .validate()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    let registration = input.into_registration();
    state
        .store
        .create(&registration)
        .await
        .map_err(AppError::from)?;
    Ok((StatusCode::CREATED, ApiResponse::ok(registration)))
}

/// List all registrations.
pub async fn list_webhooks(
    State(state): State<WebhookApiState>,
) -> Result<ApiResponse<Vec<WebhookRegistration>>, AppError> {
    let webhooks = state.store.list().await.map_err(AppError::from)?;
    Ok(ApiResponse::ok(webhooks))
}

pub async fn get_webhook(
    State(state): State<WebhookApiState>,
    Path(id): Path<String>,
) -> Result<ApiResponse<WebhookRegistration>, AppError> {
    let webhook = state.store.require(&id).await.map_err(AppError::from)?;
    Ok(ApiResponse::ok(webhook))
}

pub async fn update_webhook(
    State(state): State<WebhookApiState>,
    Path(id): Path<String>,
    Json(input): Json<UpdateWebhook>,
) -> Result<ApiResponse<WebhookRegistration>, AppError> {
    input
        .validate()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    let mut webhook = state.store.require(&id).await.map_err(AppError::from)?;
    input.apply(&mut webhook);
    state
        .store
        .update(&webhook)
        .await
        .map_err(AppError::from)?;
    Ok(ApiResponse::ok(webhook))
}

pub async fn delete_webhook(
    State(state): State<WebhookApiState>,
    Path(id): Path<String>,
) -> Result<ApiResponse<serde_json::Value>, AppError> {
    let removed = state.store.delete(&id).await.map_err(AppError::from)?;
    if !removed {
        return Err(AppError::NotFound(format!("webhook '{}'", id)));
    }
    Ok(ApiResponse::ok(json!({ "deleted": id })))
}

/// Send a synthetic `webhook_test` event through the delivery path.
pub async fn test_webhook(
    State(state): State<WebhookApiState>,
    Path(id): Path<String>,
) -> Result<ApiResponse<serde_json::Value>, AppError> {
    // 404 before enqueueing anything.
    let webhook = state.store.require(&id).await.map_err(AppError::from)?;

    let mut probe = webhook.clone();
    probe.events = vec!["webhook_test".to_string()];
    probe.filters = Default::default();
    probe.active = true;

    let envelope = EventEnvelope::new(LifecycleEvent::WebhookTest {
        webhook_id: id.clone(),
    });
    state
        .engine
        .offer_to(&probe, &envelope)
        .await
        .map_err(AppError::from)?;
    Ok(ApiResponse::ok(
        json!({ "enqueued": true, "event_id": envelope.event_id }),
    ))
}

#[derive(Debug, Deserialize)]
pub struct DeliveriesParams {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    50
}

/// Delivery audit rows (newest first) plus aggregated stats.
pub async fn webhook_deliveries(
    State(state): State<WebhookApiState>,
    Path(id): Path<String>,
    Query(params): Query<DeliveriesParams>,
) -> Result<ApiResponse<serde_json::Value>, AppError> {
    state.store.require(&id).await.map_err(AppError::from)?;

    let limit = params.limit.min(200);
    let deliveries = state
        .store
        .deliveries(&id, limit)
        .await
        .map_err(AppError::from)?;
    let stats = state.store.stats(&id).await.map_err(AppError::from)?;

    Ok(ApiResponse::ok(json!({
        "deliveries": deliveries,
        "stats": stats,
    })))
}

/// Router for the webhook management surface.
pub fn webhook_router(state: WebhookApiState) -> Router {
    Router::new()
        .route("/webhooks", post(create_webhook).get(list_webhooks))
        .route(
            "/webhooks/{id}",
            get(get_webhook).put(update_webhook).delete(delete_webhook),
        )
        .route("/webhooks/{id}/test", post(test_webhook))
        .route("/webhooks/{id}/deliveries", get(webhook_deliveries))
        .with_state(state)
}
