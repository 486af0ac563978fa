//! Simulation connector: the reference correctness probe.
//!
//! Executes jobs as deterministic sleeps with evenly spaced progress
//! ticks. Payload fields override the defaults per job:
//!
//! ```json
//! {"duration_ms": 2000, "steps": 20, "fail_with": "rate_limit", "result": {...}}
//! ```
//!
//! `fail_with` injects a classified failure at the midpoint, which is how
//! the retry and attestation paths are exercised end to end without a
//! real backend.

use crate::context::ExecutionContext;
use crate::error::ConnectorError;
use crate::{Connector, ProbeReport};
use async_trait::async_trait;
use domain_jobs::error::FailureKind;
use domain_jobs::models::Job;
use domain_jobs::progress::ProgressUpdate;
use serde_json::{Value, json};
use std::time::Duration;

/// Defaults for jobs that do not override them in the payload.
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    pub default_duration_ms: u64,
    pub default_steps: u32,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            default_duration_ms: 1_000,
            default_steps: 10,
        }
    }
}

pub struct SimulationConnector {
    config: SimulationConfig,
}

impl SimulationConnector {
    pub fn new(config: SimulationConfig) -> Self {
        Self { config }
    }
}

impl Default for SimulationConnector {
    fn default() -> Self {
        Self::new(SimulationConfig::default())
    }
}

#[async_trait]
impl Connector for SimulationConnector {
    fn name(&self) -> &str {
        "simulation"
    }

    async fn probe(&self) -> Result<ProbeReport, ConnectorError> {
        Ok(ProbeReport {
            models: vec!["sim-base".to_string(), "sim-turbo".to_string()],
            limits: Default::default(),
            healthy: true,
        })
    }

    async fn execute(&self, job: &Job, ctx: &ExecutionContext) -> Result<Value, ConnectorError> {
        let duration_ms = job
            .payload
            .get("duration_ms")
            .and_then(Value::as_u64)
            .unwrap_or(self.config.default_duration_ms);
        let steps = job
            .payload
            .get("steps")
            .and_then(Value::as_u64)
            .map(|s| s.max(1) as u32)
            .unwrap_or(self.config.default_steps);
        let fail_with = job
            .payload
            .get("fail_with")
            .and_then(Value::as_str)
            .and_then(FailureKind::parse);

        let step_duration = Duration::from_millis(duration_ms / steps as u64);
        let fail_at = fail_with.map(|_| steps / 2);

        for step in 1..=steps {
            if ctx.is_cancelled() {
                return Err(ConnectorError::Cancelled);
            }

            tokio::select! {
                _ = tokio::time::sleep(step_duration) => {}
                _ = ctx.cancelled() => return Err(ConnectorError::Cancelled),
            }

            if fail_at == Some(step) {
                let kind = fail_with.unwrap();
                return Err(ConnectorError::execution(
                    kind,
                    format!("simulated {} at step {}/{}", kind, step, steps),
                ));
            }

            let percent = ((step as u64 * 100) / steps as u64) as u8;
            ctx.report_progress(
                ProgressUpdate::percent(percent)
                    .with_message(format!("simulation step {}/{}", step, steps))
                    .with_steps(step, steps),
            );
        }

        let result = job
            .payload
            .get("result")
            .cloned()
            .unwrap_or_else(|| json!({"simulated": true, "steps": steps}));
        Ok(result)
    }
}
