//! Webhook delivery engine.
//!
//! Lifecycle events emitted by the hub are matched against registered
//! endpoints, signed, delivered over HTTP with per-endpoint retry, and
//! audited per attempt. Delivery is at-least-once; receivers deduplicate
//! on the `X-Event-Id` header.

pub mod delivery;
pub mod dispatcher;
pub mod error;
pub mod handlers;
pub mod models;
pub mod signing;
pub mod store;

pub use delivery::{DeliveryEngine, DeliveryEngineConfig};
pub use dispatcher::webhook_matches;
pub use error::WebhookError;
pub use handlers::{WebhookApiState, webhook_router};
pub use models::{
    CreateWebhook, DeliveryRecord, DeliveryStatus, RetryConfig, UpdateWebhook, WebhookFilters,
    WebhookRegistration, WebhookStats,
};
pub use store::WebhookStore;

/// Result type alias for webhook operations.
pub type WebhookResult<T> = Result<T, WebhookError>;
