//! Webhook registration and delivery-audit records.

use domain_jobs::models::now_ms;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// Per-endpoint retry policy.
///
/// Delay before attempt `n+1` is
/// `min(max_delay_ms, initial_delay_ms * backoff_multiplier^(n-1))`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1_000,
            backoff_multiplier: 2.0,
            max_delay_ms: 60_000,
        }
    }
}

impl RetryConfig {
    /// Delay after `attempt` failed attempts (1-based).
    pub fn delay_after_attempt(&self, attempt: u32) -> std::time::Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let delay = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(exponent);
        let capped = delay.min(self.max_delay_ms as f64).max(0.0);
        std::time::Duration::from_millis(capped as u64)
    }
}

/// Optional delivery filters; each declared list must match the event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WebhookFilters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_types: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priorities: Option<Vec<i64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine_ids: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_ids: Option<Vec<String>>,
}

/// A registered webhook endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookRegistration {
    pub id: String,
    pub url: String,
    /// Event types this endpoint receives.
    pub events: Vec<String>,
    pub active: bool,
    /// HMAC secret; deliveries are signed when set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    #[serde(default)]
    pub filters: WebhookFilters,
    #[serde(default)]
    pub retry_config: RetryConfig,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Input for registering a webhook.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateWebhook {
    #[validate(url(message = "url must be a valid http(s) URL"))]
    pub url: String,
    #[validate(length(min = 1, message = "at least one event type is required"))]
    pub events: Vec<String>,
    pub secret: Option<String>,
    #[serde(default)]
    pub filters: WebhookFilters,
    pub retry_config: Option<RetryConfig>,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl CreateWebhook {
    pub fn into_registration(self) -> WebhookRegistration {
        let now = now_ms();
        WebhookRegistration {
            id: Uuid::new_v4().to_string(),
            url: self.url,
            events: self.events,
            active: self.active,
            secret: self.secret,
            filters: self.filters,
            retry_config: self.retry_config.unwrap_or_default(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Partial update; absent fields keep their current values.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UpdateWebhook {
    #[validate(url(message = "url must be a valid http(s) URL"))]
    pub url: Option<String>,
    pub events: Option<Vec<String>>,
    pub active: Option<bool>,
    pub secret: Option<String>,
    pub filters: Option<WebhookFilters>,
    pub retry_config: Option<RetryConfig>,
}

impl UpdateWebhook {
    pub fn apply(self, registration: &mut WebhookRegistration) {
        if let Some(url) = self.url {
            registration.url = url;
        }
        if let Some(events) = self.events {
            registration.events = events;
        }
        if let Some(active) = self.active {
            registration.active = active;
        }
        if let Some(secret) = self.secret {
            registration.secret = if secret.is_empty() { None } else { Some(secret) };
        }
        if let Some(filters) = self.filters {
            registration.filters = filters;
        }
        if let Some(retry_config) = self.retry_config {
            registration.retry_config = retry_config;
        }
        registration.updated_at = now_ms();
    }
}

/// Outcome of one delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Delivered,
    Retrying,
    Failed,
    /// Dropped before any attempt (queue saturation).
    Dropped,
}

/// Audit row recorded for every delivery attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub webhook_id: String,
    pub event_id: String,
    pub event_type: String,
    /// 1-based attempt number.
    pub attempt: u32,
    pub status: DeliveryStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
    pub latency_ms: u64,
    /// First 256 characters of the response body.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_snippet: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: i64,
}

/// Aggregated per-endpoint delivery statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebhookStats {
    pub attempts: u64,
    pub delivered: u64,
    pub failed: u64,
    pub last_delivery_at: Option<i64>,
    pub last_status: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use validator::Validate;

    #[test]
    fn test_retry_delay_schedule() {
        let config = RetryConfig {
            max_attempts: 3,
            initial_delay_ms: 1_000,
            backoff_multiplier: 2.0,
            max_delay_ms: 60_000,
        };
        assert_eq!(config.delay_after_attempt(1).as_millis(), 1_000);
        assert_eq!(config.delay_after_attempt(2).as_millis(), 2_000);
        assert_eq!(config.delay_after_attempt(3).as_millis(), 4_000);
    }

    #[test]
    fn test_retry_delay_caps_at_max() {
        let config = RetryConfig {
            max_attempts: 10,
            initial_delay_ms: 1_000,
            backoff_multiplier: 10.0,
            max_delay_ms: 5_000,
        };
        assert_eq!(config.delay_after_attempt(4).as_millis(), 5_000);
    }

    #[test]
    fn test_create_webhook_validation() {
        let bad_url = CreateWebhook {
            url: "not a url".into(),
            events: vec!["job_completed".into()],
            secret: None,
            filters: WebhookFilters::default(),
            retry_config: None,
            active: true,
        };
        assert!(bad_url.validate().is_err());

        let no_events = CreateWebhook {
            url: "https://example.com/hook".into(),
            events: vec![],
            secret: None,
            filters: WebhookFilters::default(),
            retry_config: None,
            active: true,
        };
        assert!(no_events.validate().is_err());
    }

    #[test]
    fn test_create_into_registration_defaults() {
        let registration = CreateWebhook {
            url: "https://example.com/hook".into(),
            events: vec!["job_completed".into()],
            secret: Some("s3cret".into()),
            filters: WebhookFilters::default(),
            retry_config: None,
            active: true,
        }
        .into_registration();

        assert!(registration.active);
        assert_eq!(registration.retry_config, RetryConfig::default());
        assert!(!registration.id.is_empty());
    }

    #[test]
    fn test_update_applies_partially() {
        let mut registration = CreateWebhook {
            url: "https://example.com/hook".into(),
            events: vec!["job_completed".into()],
            secret: Some("old".into()),
            filters: WebhookFilters::default(),
            retry_config: None,
            active: true,
        }
        .into_registration();

        UpdateWebhook {
            active: Some(false),
            secret: Some(String::new()),
            ..Default::default()
        }
        .apply(&mut registration);

        assert!(!registration.active);
        assert!(registration.secret.is_none());
        assert_eq!(registration.url, "https://example.com/hook");
    }
}
