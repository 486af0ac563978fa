//! End-to-end delivery tests: a real Redis store, a real local HTTP
//! receiver, and the full dispatch → sign → deliver → retry → audit path.

use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use domain_jobs::events::{EventEnvelope, LifecycleEvent};
use domain_webhooks::signing;
use domain_webhooks::{
    CreateWebhook, DeliveryEngine, DeliveryEngineConfig, DeliveryStatus, RetryConfig,
    WebhookFilters, WebhookStore,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use test_utils::TestRedis;
use tokio::sync::watch;

#[derive(Clone, Debug)]
struct ReceivedRequest {
    headers: HeaderMap,
    body: Vec<u8>,
    at_ms: i64,
}

#[derive(Clone)]
struct ReceiverState {
    requests: Arc<Mutex<Vec<ReceivedRequest>>>,
    /// Status codes to answer with, consumed in order; the last repeats.
    responses: Arc<Mutex<Vec<u16>>>,
}

async fn receive(
    State(state): State<ReceiverState>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    state.requests.lock().unwrap().push(ReceivedRequest {
        headers,
        body: body.to_vec(),
        at_ms: chrono::Utc::now().timestamp_millis(),
    });
    let mut responses = state.responses.lock().unwrap();
    let code = if responses.len() > 1 {
        responses.remove(0)
    } else {
        responses[0]
    };
    StatusCode::from_u16(code).unwrap()
}

/// Spawn a local receiver; returns its URL and the captured requests.
async fn spawn_receiver(responses: Vec<u16>) -> (String, ReceiverState) {
    let state = ReceiverState {
        requests: Arc::new(Mutex::new(Vec::new())),
        responses: Arc::new(Mutex::new(responses)),
    };
    let app = Router::new()
        .route("/hook", post(receive))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{}/hook", addr), state)
}

fn fast_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 3,
        initial_delay_ms: 200,
        backoff_multiplier: 2.0,
        max_delay_ms: 5_000,
    }
}

fn completion_event() -> EventEnvelope {
    EventEnvelope::new(LifecycleEvent::CompleteJob {
        job_id: "j1".into(),
        worker_id: "w1".into(),
        result: Some(serde_json::json!({"frames": 4})),
    })
}

async fn setup_engine(redis: &TestRedis) -> (WebhookStore, DeliveryEngine, watch::Sender<bool>) {
    let store = WebhookStore::new(redis.manager().await);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let engine = DeliveryEngine::start(
        store.clone(),
        DeliveryEngineConfig {
            queue_capacity: 64,
            max_concurrent_deliveries: 4,
            request_timeout: Duration::from_secs(5),
        },
        shutdown_rx,
    );
    (store, engine, shutdown_tx)
}

async fn wait_for<F: Fn() -> bool>(condition: F, timeout: Duration) {
    let deadline = tokio::time::Instant::now() + timeout;
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within {:?}",
            timeout
        );
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

#[tokio::test]
async fn test_successful_delivery_is_signed_and_audited() {
    let redis = TestRedis::new().await;
    let (store, engine, _shutdown) = setup_engine(&redis).await;
    let (url, receiver) = spawn_receiver(vec![200]).await;

    let webhook = CreateWebhook {
        url,
        events: vec!["complete_job".into()],
        secret: Some("s3cret".into()),
        filters: WebhookFilters::default(),
        retry_config: Some(fast_retry()),
        active: true,
    }
    .into_registration();
    store.create(&webhook).await.unwrap();

    let envelope = completion_event();
    engine.offer(&envelope).await.unwrap();

    let requests = receiver.requests.clone();
    wait_for(|| !requests.lock().unwrap().is_empty(), Duration::from_secs(5)).await;

    let received = receiver.requests.lock().unwrap()[0].clone();

    // Signature law: HMAC over the exact received bytes verifies.
    let signature = received
        .headers
        .get("x-signature")
        .expect("signed delivery carries X-Signature")
        .to_str()
        .unwrap()
        .to_string();
    assert!(signing::verify_signature("s3cret", &received.body, &signature));

    assert_eq!(
        received.headers.get("x-webhook-event").unwrap(),
        "complete_job"
    );
    assert_eq!(
        received.headers.get("x-webhook-id").unwrap().to_str().unwrap(),
        webhook.id
    );
    assert_eq!(
        received.headers.get("x-event-id").unwrap().to_str().unwrap(),
        envelope.event_id
    );

    // The body is the canonical envelope.
    let body: serde_json::Value = serde_json::from_slice(&received.body).unwrap();
    assert_eq!(body["type"], "complete_job");
    assert_eq!(body["event_id"], serde_json::json!(envelope.event_id));

    // Audit row and stats land just after the response is read.
    tokio::time::sleep(Duration::from_millis(200)).await;
    let deliveries = store.deliveries(&webhook.id, 10).await.unwrap();
    assert_eq!(deliveries.len(), 1);
    assert_eq!(deliveries[0].status, DeliveryStatus::Delivered);
    assert_eq!(deliveries[0].http_status, Some(200));
    assert_eq!(deliveries[0].attempt, 1);

    let stats = store.stats(&webhook.id).await.unwrap();
    assert_eq!(stats.delivered, 1);
    assert_eq!(stats.attempts, 1);
}

#[tokio::test]
async fn test_retry_with_backoff_until_success() {
    let redis = TestRedis::new().await;
    let (store, engine, _shutdown) = setup_engine(&redis).await;
    // 500, 500, then 200: delivered on the third attempt.
    let (url, receiver) = spawn_receiver(vec![500, 500, 200]).await;

    let webhook = CreateWebhook {
        url,
        events: vec!["complete_job".into()],
        secret: None,
        filters: WebhookFilters::default(),
        retry_config: Some(fast_retry()),
        active: true,
    }
    .into_registration();
    store.create(&webhook).await.unwrap();

    engine.offer(&completion_event()).await.unwrap();

    let requests = receiver.requests.clone();
    wait_for(
        || requests.lock().unwrap().len() == 3,
        Duration::from_secs(10),
    )
    .await;

    // Let the final audit row land.
    tokio::time::sleep(Duration::from_millis(200)).await;

    // Attempt spacing follows initial * multiplier^(n-1): ~200ms, ~400ms.
    let received = receiver.requests.lock().unwrap().clone();
    let gap1 = received[1].at_ms - received[0].at_ms;
    let gap2 = received[2].at_ms - received[1].at_ms;
    assert!(gap1 >= 180, "first retry came after {}ms", gap1);
    assert!(gap2 >= 360, "second retry came after {}ms", gap2);
    assert!(gap2 > gap1, "backoff grows between attempts");

    // Delivery rows: retrying, retrying, delivered (newest first).
    let deliveries = store.deliveries(&webhook.id, 10).await.unwrap();
    assert_eq!(deliveries.len(), 3);
    assert_eq!(deliveries[0].status, DeliveryStatus::Delivered);
    assert_eq!(deliveries[0].attempt, 3);
    assert_eq!(deliveries[1].status, DeliveryStatus::Retrying);
    assert_eq!(deliveries[2].status, DeliveryStatus::Retrying);
    assert_eq!(deliveries[2].attempt, 1);

    let stats = store.stats(&webhook.id).await.unwrap();
    assert_eq!(stats.attempts, 3);
    assert_eq!(stats.delivered, 1);
    assert_eq!(stats.failed, 0);
}

#[tokio::test]
async fn test_exhausted_retries_mark_failed() {
    let redis = TestRedis::new().await;
    let (store, engine, _shutdown) = setup_engine(&redis).await;
    let (url, receiver) = spawn_receiver(vec![500]).await;

    let webhook = CreateWebhook {
        url,
        events: vec!["complete_job".into()],
        secret: None,
        filters: WebhookFilters::default(),
        retry_config: Some(RetryConfig {
            max_attempts: 2,
            initial_delay_ms: 100,
            backoff_multiplier: 2.0,
            max_delay_ms: 1_000,
        }),
        active: true,
    }
    .into_registration();
    store.create(&webhook).await.unwrap();

    engine.offer(&completion_event()).await.unwrap();

    let requests = receiver.requests.clone();
    wait_for(
        || requests.lock().unwrap().len() == 2,
        Duration::from_secs(5),
    )
    .await;
    // Let the final audit row land.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let deliveries = store.deliveries(&webhook.id, 10).await.unwrap();
    assert_eq!(deliveries.len(), 2);
    assert_eq!(deliveries[0].status, DeliveryStatus::Failed);

    let stats = store.stats(&webhook.id).await.unwrap();
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.delivered, 0);
}

#[tokio::test]
async fn test_event_type_mismatch_is_not_delivered() {
    let redis = TestRedis::new().await;
    let (store, engine, _shutdown) = setup_engine(&redis).await;
    let (url, receiver) = spawn_receiver(vec![200]).await;

    let webhook = CreateWebhook {
        url,
        events: vec!["job_failed".into()],
        secret: None,
        filters: WebhookFilters::default(),
        retry_config: Some(fast_retry()),
        active: true,
    }
    .into_registration();
    store.create(&webhook).await.unwrap();

    engine.offer(&completion_event()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert!(receiver.requests.lock().unwrap().is_empty());
    assert!(store.deliveries(&webhook.id, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unsigned_delivery_has_no_signature_header() {
    let redis = TestRedis::new().await;
    let (store, engine, _shutdown) = setup_engine(&redis).await;
    let (url, receiver) = spawn_receiver(vec![200]).await;

    let webhook = CreateWebhook {
        url,
        events: vec!["complete_job".into()],
        secret: None,
        filters: WebhookFilters::default(),
        retry_config: Some(fast_retry()),
        active: true,
    }
    .into_registration();
    store.create(&webhook).await.unwrap();

    engine.offer(&completion_event()).await.unwrap();

    let requests = receiver.requests.clone();
    wait_for(|| !requests.lock().unwrap().is_empty(), Duration::from_secs(5)).await;

    let received = receiver.requests.lock().unwrap()[0].clone();
    assert!(received.headers.get("x-signature").is_none());
    assert!(received.headers.get("x-event-id").is_some());
}
