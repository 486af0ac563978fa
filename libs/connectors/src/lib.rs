//! Connector contract between the worker runtime and service backends.
//!
//! A connector adapts one backend (ComfyUI, a hosted API, a plain REST
//! service, the in-process simulator) to a uniform interface:
//!
//! - `name()` matches `job.service_required`
//! - `probe()` runs once at startup and reports discovered models/limits
//! - `execute(job, ctx)` runs the job, reporting progress through `ctx`
//!   and observing its cancellation signal between round-trips
//! - `cancel(job_id)` is a best-effort forward of a cancel to the backend
//!
//! Connectors must not touch global state other than their remote
//! service; everything a run needs arrives through the job and the
//! context. The simulation connector is the reference correctness probe:
//! deterministic sleeps and progress ticks, no external dependencies.

mod context;
mod error;
mod http;
mod registry;
mod simulation;

pub use context::ExecutionContext;
pub use error::ConnectorError;
pub use http::{HttpConnector, HttpConnectorConfig};
pub use registry::ConnectorRegistry;
pub use simulation::{SimulationConfig, SimulationConnector};

use async_trait::async_trait;
use domain_jobs::models::Job;
use serde_json::Value;
use std::collections::HashMap;

/// What a connector learned about its backend at startup.
#[derive(Debug, Clone, Default)]
pub struct ProbeReport {
    /// Models the backend can serve, keyed by nothing (flat list); the
    /// worker folds this into its per-service model map.
    pub models: Vec<String>,
    /// Backend-specific limits worth advertising (e.g. max resolution).
    pub limits: HashMap<String, Value>,
    /// Whether the backend answered the probe at all.
    pub healthy: bool,
}

/// A service adapter the worker runtime can execute jobs through.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Service name; jobs with this `service_required` route here.
    fn name(&self) -> &str;

    /// One-shot startup probe: health, models, effective limits.
    async fn probe(&self) -> Result<ProbeReport, ConnectorError>;

    /// Run the job to completion, streaming progress through `ctx`.
    /// Returns the result value on success; errors carry their failure
    /// classification.
    async fn execute(&self, job: &Job, ctx: &ExecutionContext) -> Result<Value, ConnectorError>;

    /// Best-effort cancellation forwarded to the backend. The runtime
    /// also raises the context's cancellation signal; a connector that
    /// only observes the signal may leave this as the default no-op.
    async fn cancel(&self, _job_id: &str) -> Result<(), ConnectorError> {
        Ok(())
    }
}
