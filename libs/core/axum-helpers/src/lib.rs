//! Shared HTTP plumbing for the workspace's axum servers.
//!
//! - `errors`: `AppError` with the HTTP status mapping used by every
//!   management endpoint
//! - `response`: the `{success, data|error}` JSON envelope
//! - `health`: liveness/readiness/metrics endpoints backed by Redis PING
//! - `metrics`: Prometheus recorder installation and rendering
//! - `shutdown`: signal handling and coordinated graceful shutdown
//! - `server`: listener setup with graceful shutdown wired in

pub mod errors;
pub mod health;
pub mod metrics;
pub mod response;
pub mod server;
pub mod shutdown;

pub use errors::AppError;
pub use health::{HealthState, health_router};
pub use response::ApiResponse;
pub use server::create_app;
pub use shutdown::{ShutdownCoordinator, shutdown_signal};
