//! Redis-backed webhook registry and delivery audit log.
//!
//! Keys:
//! - `webhook:{id}` - registration (JSON string)
//! - `webhooks:index` - set of registered ids
//! - `webhook:deliveries:{id}` - capped list of delivery records, newest first
//! - `webhook:stats:{id}` - per-endpoint counters

use crate::error::WebhookError;
use crate::models::{
    DeliveryRecord, DeliveryStatus, WebhookRegistration, WebhookStats,
};
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tracing::{debug, info};

const INDEX_KEY: &str = "webhooks:index";

/// Maximum delivery rows retained per endpoint.
const DELIVERY_LOG_CAP: isize = 200;

fn registration_key(id: &str) -> String {
    format!("webhook:{}", id)
}

fn deliveries_key(id: &str) -> String {
    format!("webhook:deliveries:{}", id)
}

fn stats_key(id: &str) -> String {
    format!("webhook:stats:{}", id)
}

#[derive(Clone)]
pub struct WebhookStore {
    redis: ConnectionManager,
}

impl WebhookStore {
    pub fn new(redis: ConnectionManager) -> Self {
        Self { redis }
    }

    pub async fn create(&self, registration: &WebhookRegistration) -> Result<(), WebhookError> {
        let mut conn = self.redis.clone();
        let payload = serde_json::to_string(registration)?;
        redis::pipe()
            .set(registration_key(&registration.id), payload)
            .ignore()
            .sadd(INDEX_KEY, &registration.id)
            .ignore()
            .exec_async(&mut conn)
            .await?;
        info!(webhook_id = %registration.id, url = %registration.url, "Webhook registered");
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<Option<WebhookRegistration>, WebhookError> {
        let mut conn = self.redis.clone();
        let raw: Option<String> = conn.get(registration_key(id)).await?;
        raw.map(|raw| serde_json::from_str(&raw).map_err(WebhookError::from))
            .transpose()
    }

    pub async fn require(&self, id: &str) -> Result<WebhookRegistration, WebhookError> {
        self.get(id)
            .await?
            .ok_or_else(|| WebhookError::NotFound(format!("webhook '{}'", id)))
    }

    pub async fn update(&self, registration: &WebhookRegistration) -> Result<(), WebhookError> {
        let mut conn = self.redis.clone();
        let payload = serde_json::to_string(registration)?;
        let _: () = conn.set(registration_key(&registration.id), payload).await?;
        debug!(webhook_id = %registration.id, "Webhook updated");
        Ok(())
    }

    pub async fn delete(&self, id: &str) -> Result<bool, WebhookError> {
        let mut conn = self.redis.clone();
        let removed: i64 = conn.srem(INDEX_KEY, id).await?;
        redis::pipe()
            .del(registration_key(id))
            .ignore()
            .del(deliveries_key(id))
            .ignore()
            .del(stats_key(id))
            .ignore()
            .exec_async(&mut conn)
            .await?;
        Ok(removed > 0)
    }

    pub async fn list(&self) -> Result<Vec<WebhookRegistration>, WebhookError> {
        let mut conn = self.redis.clone();
        let ids: Vec<String> = conn.smembers(INDEX_KEY).await?;
        let mut registrations = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(registration) = self.get(&id).await? {
                registrations.push(registration);
            }
        }
        registrations.sort_by_key(|r| r.created_at);
        Ok(registrations)
    }

    /// Registrations that are active (delivery candidates).
    pub async fn list_active(&self) -> Result<Vec<WebhookRegistration>, WebhookError> {
        Ok(self.list().await?.into_iter().filter(|r| r.active).collect())
    }

    /// Append a delivery row and fold it into the endpoint's stats.
    pub async fn record_delivery(&self, record: &DeliveryRecord) -> Result<(), WebhookError> {
        let mut conn = self.redis.clone();
        let payload = serde_json::to_string(record)?;
        let stats = stats_key(&record.webhook_id);
        let status_str = match record.status {
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::Retrying => "retrying",
            DeliveryStatus::Failed => "failed",
            DeliveryStatus::Dropped => "dropped",
        };

        let mut pipe = redis::pipe();
        pipe.lpush(deliveries_key(&record.webhook_id), payload)
            .ignore()
            .ltrim(deliveries_key(&record.webhook_id), 0, DELIVERY_LOG_CAP - 1)
            .ignore()
            .cmd("HINCRBY")
            .arg(&stats)
            .arg("attempts")
            .arg(1)
            .ignore()
            .hset(&stats, "last_status", status_str)
            .ignore()
            .hset(&stats, "last_delivery_at", record.timestamp)
            .ignore();
        match record.status {
            DeliveryStatus::Delivered => {
                pipe.cmd("HINCRBY").arg(&stats).arg("delivered").arg(1).ignore();
            }
            DeliveryStatus::Failed | DeliveryStatus::Dropped => {
                pipe.cmd("HINCRBY").arg(&stats).arg("failed").arg(1).ignore();
            }
            DeliveryStatus::Retrying => {}
        }
        pipe.exec_async(&mut conn).await?;
        Ok(())
    }

    /// Delivery rows, newest first.
    pub async fn deliveries(
        &self,
        id: &str,
        limit: usize,
    ) -> Result<Vec<DeliveryRecord>, WebhookError> {
        let mut conn = self.redis.clone();
        let raw: Vec<String> = conn
            .lrange(deliveries_key(id), 0, limit as isize - 1)
            .await?;
        let mut records = Vec::with_capacity(raw.len());
        for item in raw {
            records.push(serde_json::from_str(&item)?);
        }
        Ok(records)
    }

    pub async fn stats(&self, id: &str) -> Result<WebhookStats, WebhookError> {
        let mut conn = self.redis.clone();
        let map: std::collections::HashMap<String, String> =
            conn.hgetall(stats_key(id)).await?;
        Ok(WebhookStats {
            attempts: map.get("attempts").and_then(|v| v.parse().ok()).unwrap_or(0),
            delivered: map
                .get("delivered")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
            failed: map.get("failed").and_then(|v| v.parse().ok()).unwrap_or(0),
            last_delivery_at: map.get("last_delivery_at").and_then(|v| v.parse().ok()),
            last_status: map.get("last_status").cloned(),
        })
    }
}
