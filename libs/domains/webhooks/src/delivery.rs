//! Delivery engine: signed HTTP fan-out with per-endpoint retry.
//!
//! A bounded queue feeds a fixed-size pool of delivery tasks. Saturation
//! drops the delivery (recorded and logged) rather than blocking the
//! event emitter; receivers that care recover via the management API.
//! Within one delivery, attempts retry in-process on the endpoint's
//! backoff schedule until `max_attempts`. Every attempt writes an audit
//! row. Failures never propagate to the emitter.

use crate::models::{DeliveryRecord, DeliveryStatus, WebhookRegistration};
use crate::signing;
use crate::store::WebhookStore;
use crate::{WebhookError, webhook_matches};
use domain_jobs::events::EventEnvelope;
use domain_jobs::models::now_ms;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Semaphore, mpsc, watch};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct DeliveryEngineConfig {
    /// Pending deliveries the queue holds before dropping.
    pub queue_capacity: usize,
    /// Concurrent delivery tasks.
    pub max_concurrent_deliveries: usize,
    /// Per-request HTTP timeout.
    pub request_timeout: Duration,
}

impl Default for DeliveryEngineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1_024,
            max_concurrent_deliveries: 8,
            request_timeout: Duration::from_secs(30),
        }
    }
}

struct DeliveryTask {
    webhook: WebhookRegistration,
    envelope: EventEnvelope,
}

/// Handle for enqueueing deliveries. Cloneable; the consumer pool runs
/// until the shutdown signal flips.
#[derive(Clone)]
pub struct DeliveryEngine {
    store: WebhookStore,
    tx: mpsc::Sender<DeliveryTask>,
}

impl DeliveryEngine {
    /// Start the consumer pool and return the enqueue handle.
    pub fn start(
        store: WebhookStore,
        config: DeliveryEngineConfig,
        mut shutdown: watch::Receiver<bool>,
    ) -> Self {
        let (tx, mut rx) = mpsc::channel::<DeliveryTask>(config.queue_capacity);

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent("grid-hub-webhooks")
            .build()
            .expect("failed to build webhook HTTP client");

        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_deliveries));
        let pool_store = store.clone();

        tokio::spawn(async move {
            info!(
                queue_capacity = config.queue_capacity,
                max_concurrent = config.max_concurrent_deliveries,
                "Webhook delivery pool started"
            );
            loop {
                let task = tokio::select! {
                    task = rx.recv() => match task {
                        Some(task) => task,
                        None => break,
                    },
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            break;
                        }
                        continue;
                    }
                };

                let permit = match semaphore.clone().acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => break,
                };
                let client = client.clone();
                let store = pool_store.clone();
                tokio::spawn(async move {
                    deliver_with_retry(client, store, task.webhook, task.envelope).await;
                    drop(permit);
                });
            }
            info!("Webhook delivery pool stopped");
        });

        Self { store, tx }
    }

    /// Offer an event to every matching active webhook. Never blocks:
    /// deliveries that do not fit the queue are dropped and recorded.
    pub async fn offer(&self, envelope: &EventEnvelope) -> Result<(), WebhookError> {
        let webhooks = self.store.list_active().await?;
        for webhook in webhooks {
            if !webhook_matches(&webhook, envelope) {
                continue;
            }
            self.enqueue(webhook, envelope).await;
        }
        Ok(())
    }

    /// Enqueue a delivery to one specific registration, bypassing the
    /// match (the `/test` endpoint path).
    pub async fn offer_to(
        &self,
        webhook: &WebhookRegistration,
        envelope: &EventEnvelope,
    ) -> Result<(), WebhookError> {
        self.enqueue(webhook.clone(), envelope).await;
        Ok(())
    }

    async fn enqueue(&self, webhook: WebhookRegistration, envelope: &EventEnvelope) {
        metrics::counter!("webhook_deliveries_enqueued_total").increment(1);
        let webhook_id = webhook.id.clone();
        let task = DeliveryTask {
            webhook,
            envelope: envelope.clone(),
        };
        if self.tx.try_send(task).is_err() {
            warn!(
                webhook_id = %webhook_id,
                event_id = %envelope.event_id,
                "Delivery queue full, dropping delivery"
            );
            metrics::counter!("webhook_deliveries_dropped_total").increment(1);
            let dropped = DeliveryRecord {
                webhook_id,
                event_id: envelope.event_id.clone(),
                event_type: envelope.event.event_type().to_string(),
                attempt: 0,
                status: DeliveryStatus::Dropped,
                http_status: None,
                latency_ms: 0,
                response_snippet: None,
                error: Some("delivery queue saturated".to_string()),
                timestamp: now_ms(),
            };
            // Audit the drop; ignore audit failures here.
            let _ = self.store.record_delivery(&dropped).await;
        }
    }
}

/// Execute one delivery: attempt, record, back off, repeat.
async fn deliver_with_retry(
    client: reqwest::Client,
    store: WebhookStore,
    webhook: WebhookRegistration,
    envelope: EventEnvelope,
) {
    // Serialize once: the signature must cover the exact bytes sent on
    // every attempt.
    let body = match serde_json::to_vec(&envelope) {
        Ok(body) => body,
        Err(e) => {
            error!(event_id = %envelope.event_id, error = %e, "Failed to serialize event");
            return;
        }
    };
    let signature = webhook
        .secret
        .as_deref()
        .map(|secret| signing::signature_header(secret, &body));
    let event_type = envelope.event.event_type();
    let max_attempts = webhook.retry_config.max_attempts.max(1);

    for attempt in 1..=max_attempts {
        let started = Instant::now();
        let mut request = client
            .post(&webhook.url)
            .header("Content-Type", "application/json")
            .header(signing::EVENT_HEADER, event_type)
            .header(signing::WEBHOOK_ID_HEADER, &webhook.id)
            .header(signing::EVENT_ID_HEADER, &envelope.event_id)
            .body(body.clone());
        if let Some(signature) = &signature {
            request = request.header(signing::SIGNATURE_HEADER, signature);
        }

        let outcome = request.send().await;
        let latency_ms = started.elapsed().as_millis() as u64;

        let (http_status, snippet, error_text, delivered) = match outcome {
            Ok(response) => {
                let status = response.status().as_u16();
                let delivered = (200..300).contains(&status);
                let snippet: String = response
                    .text()
                    .await
                    .unwrap_or_default()
                    .chars()
                    .take(256)
                    .collect();
                (Some(status), Some(snippet), None, delivered)
            }
            Err(e) => (None, None, Some(e.to_string()), false),
        };

        let is_last = attempt == max_attempts;
        let status = if delivered {
            DeliveryStatus::Delivered
        } else if is_last {
            DeliveryStatus::Failed
        } else {
            DeliveryStatus::Retrying
        };

        let record = DeliveryRecord {
            webhook_id: webhook.id.clone(),
            event_id: envelope.event_id.clone(),
            event_type: event_type.to_string(),
            attempt,
            status,
            http_status,
            latency_ms,
            response_snippet: snippet,
            error: error_text.clone(),
            timestamp: now_ms(),
        };
        if let Err(e) = store.record_delivery(&record).await {
            error!(webhook_id = %webhook.id, error = %e, "Failed to record delivery attempt");
        }

        metrics::histogram!("webhook_delivery_duration_seconds")
            .record(latency_ms as f64 / 1_000.0);

        if delivered {
            metrics::counter!("webhook_deliveries_total", "status" => "delivered").increment(1);
            debug!(
                webhook_id = %webhook.id,
                event_id = %envelope.event_id,
                attempt = attempt,
                "Webhook delivered"
            );
            return;
        }

        if is_last {
            metrics::counter!("webhook_deliveries_total", "status" => "failed").increment(1);
            warn!(
                webhook_id = %webhook.id,
                event_id = %envelope.event_id,
                attempts = max_attempts,
                http_status = ?http_status,
                error = ?error_text,
                "Webhook delivery failed permanently"
            );
            return;
        }

        let delay = webhook.retry_config.delay_after_attempt(attempt);
        debug!(
            webhook_id = %webhook.id,
            attempt = attempt,
            delay_ms = delay.as_millis() as u64,
            "Webhook attempt failed, backing off"
        );
        tokio::time::sleep(delay).await;
    }
}
