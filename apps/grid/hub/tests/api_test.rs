//! Management API integration tests: a real Redis and the full router
//! served on a local port.

use domain_jobs::models::JobStatus;
use domain_jobs::{EventBus, ForensicsService, JobStore, QueueConfig};
use domain_webhooks::{DeliveryEngine, DeliveryEngineConfig, WebhookStore};
use grid_hub::broadcast::Broadcaster;
use grid_hub::config::HubConfig;
use grid_hub::state::AppState;
use serde_json::{Value, json};
use std::sync::Arc;
use test_utils::TestRedis;
use tokio::sync::watch;

struct Harness {
    base_url: String,
    client: reqwest::Client,
    store: JobStore,
    bus: EventBus,
    _shutdown: watch::Sender<bool>,
}

async fn serve(redis: &TestRedis) -> Harness {
    let manager = redis.manager().await;
    let queue = QueueConfig::default();
    let store = JobStore::new(manager.clone(), queue.clone());
    let bus = EventBus::new(manager.clone());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let config = Arc::new(HubConfig {
        server: core_config::server::ServerConfig::default(),
        monitor_auth_token: None,
        ring_capacity: 100,
        resync_max_events: 100,
        monitor_queue_capacity: 32,
        monitor_sweep_interval_secs: 30,
        monitor_stale_threshold_secs: 60,
        janitor_interval_secs: 15,
        stats_interval_secs: 10,
        queue,
    });

    let webhook_store = WebhookStore::new(manager.clone());
    let state = AppState {
        store: store.clone(),
        forensics: ForensicsService::new(store.clone()),
        bus: bus.clone(),
        broadcaster: Broadcaster::new(100, 32, 100),
        webhook_store: webhook_store.clone(),
        webhook_engine: DeliveryEngine::start(
            webhook_store,
            DeliveryEngineConfig::default(),
            shutdown_rx,
        ),
        config,
    };

    let app = axum::Router::new().nest("/api", grid_hub::api::api_router(state));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    Harness {
        base_url: format!("http://{}/api", addr),
        client: reqwest::Client::new(),
        store,
        bus,
        _shutdown: shutdown_tx,
    }
}

#[tokio::test]
async fn test_submit_job_writes_record_and_emits_event() {
    let redis = TestRedis::new().await;
    let h = serve(&redis).await;

    let response = h
        .client
        .post(format!("{}/jobs", h.base_url))
        .json(&json!({
            "service_required": "simulation",
            "priority": 120,
            "payload": {"prompt": "city at night"}
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 201);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["success"], json!(true));
    let job_id = body["data"]["id"].as_str().unwrap().to_string();
    assert_eq!(body["data"]["effective_priority"], json!(120));

    let stored = h.store.require_job(&job_id).await.unwrap();
    assert_eq!(stored.status, JobStatus::Pending);

    // Submission reached the lifecycle stream.
    let events = h.bus.read_after("0-0", 200, 10).await.unwrap();
    assert!(
        events
            .iter()
            .any(|(_, e)| e.event.event_type() == "job_submitted"
                && e.event.job_id() == Some(job_id.as_str()))
    );
}

#[tokio::test]
async fn test_submit_rejects_missing_service() {
    let redis = TestRedis::new().await;
    let h = serve(&redis).await;

    let response = h
        .client
        .post(format!("{}/jobs", h.base_url))
        .json(&json!({"service_required": "   "}))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["success"], json!(false));
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_get_missing_job_is_404() {
    let redis = TestRedis::new().await;
    let h = serve(&redis).await;

    let response = h
        .client
        .get(format!("{}/jobs/ghost", h.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn test_cancel_pending_job() {
    let redis = TestRedis::new().await;
    let h = serve(&redis).await;

    let submit: Value = h
        .client
        .post(format!("{}/jobs", h.base_url))
        .json(&json!({"service_required": "simulation"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let job_id = submit["data"]["id"].as_str().unwrap();

    let response = h
        .client
        .post(format!("{}/jobs/{}/cancel", h.base_url, job_id))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["data"]["status"], json!("cancelled"));

    // Cancelling again conflicts.
    let again = h
        .client
        .post(format!("{}/jobs/{}/cancel", h.base_url, job_id))
        .send()
        .await
        .unwrap();
    assert_eq!(again.status(), 409);
}

#[tokio::test]
async fn test_retry_requires_terminal_state() {
    let redis = TestRedis::new().await;
    let h = serve(&redis).await;

    let submit: Value = h
        .client
        .post(format!("{}/jobs", h.base_url))
        .json(&json!({"service_required": "simulation"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let job_id = submit["data"]["id"].as_str().unwrap();

    let response = h
        .client
        .post(format!("{}/jobs/{}/retry", h.base_url, job_id))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 409, "pending jobs cannot be retried");
}

#[tokio::test]
async fn test_list_jobs_filters_by_status() {
    let redis = TestRedis::new().await;
    let h = serve(&redis).await;

    for _ in 0..3 {
        h.client
            .post(format!("{}/jobs", h.base_url))
            .json(&json!({"service_required": "simulation"}))
            .send()
            .await
            .unwrap();
    }

    let body: Value = h
        .client
        .get(format!("{}/jobs?status=pending", h.base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["data"].as_array().unwrap().len(), 3);

    let completed: Value = h
        .client
        .get(format!("{}/jobs?status=completed", h.base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(completed["data"].as_array().unwrap().is_empty());

    let bad = h
        .client
        .get(format!("{}/jobs?status=sideways", h.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(bad.status(), 400);
}

#[tokio::test]
async fn test_webhook_crud_roundtrip() {
    let redis = TestRedis::new().await;
    let h = serve(&redis).await;

    let created: Value = h
        .client
        .post(format!("{}/webhooks", h.base_url))
        .json(&json!({
            "url": "https://example.com/hook",
            "events": ["job_completed"],
            "secret": "s3cret"
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(created["success"], json!(true));
    let webhook_id = created["data"]["id"].as_str().unwrap().to_string();

    let listed: Value = h
        .client
        .get(format!("{}/webhooks", h.base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listed["data"].as_array().unwrap().len(), 1);

    let updated: Value = h
        .client
        .put(format!("{}/webhooks/{}", h.base_url, webhook_id))
        .json(&json!({"active": false}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(updated["data"]["active"], json!(false));

    let deleted = h
        .client
        .delete(format!("{}/webhooks/{}", h.base_url, webhook_id))
        .send()
        .await
        .unwrap();
    assert_eq!(deleted.status(), 200);

    let gone = h
        .client
        .get(format!("{}/webhooks/{}", h.base_url, webhook_id))
        .send()
        .await
        .unwrap();
    assert_eq!(gone.status(), 404);
}

#[tokio::test]
async fn test_webhook_validation() {
    let redis = TestRedis::new().await;
    let h = serve(&redis).await;

    let response = h
        .client
        .post(format!("{}/webhooks", h.base_url))
        .json(&json!({"url": "not a url", "events": ["job_completed"]}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    let response = h
        .client
        .post(format!("{}/webhooks", h.base_url))
        .json(&json!({"url": "https://example.com/h", "events": []}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn test_metrics_and_workers_endpoints() {
    let redis = TestRedis::new().await;
    let h = serve(&redis).await;

    let workers: Value = h
        .client
        .get(format!("{}/workers", h.base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(workers["data"].as_array().unwrap().is_empty());

    h.client
        .post(format!("{}/jobs", h.base_url))
        .json(&json!({"service_required": "simulation"}))
        .send()
        .await
        .unwrap();

    let metrics: Value = h
        .client
        .get(format!("{}/metrics", h.base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(metrics["data"]["pending_jobs"], json!(1));
}

#[tokio::test]
async fn test_forensics_endpoint_for_failed_job() {
    let redis = TestRedis::new().await;
    let h = serve(&redis).await;

    let submit: Value = h
        .client
        .post(format!("{}/jobs", h.base_url))
        .json(&json!({"service_required": "simulation"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let job_id = submit["data"]["id"].as_str().unwrap().to_string();

    h.store
        .fail_job(
            &job_id,
            None,
            "boom",
            domain_jobs::FailureKind::MalformedJob,
            false,
        )
        .await
        .unwrap();

    let body: Value = h
        .client
        .get(format!("{}/jobs/{}/forensics", h.base_url, job_id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["success"], json!(true));
    assert_eq!(body["data"]["job"]["status"], json!("failed"));
    assert_eq!(body["data"]["job"]["error"], json!("boom"));
}
