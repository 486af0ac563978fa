//! Capability discovery.
//!
//! Builds the worker record the matcher evaluates against: identity and
//! hardware from the environment, services and models from connector
//! probes, arbitrary extra keys from the `WORKER_CAPABILITIES` blob. The
//! resulting document is the single source of truth; the poll loop hands
//! the same record to the matcher unchanged.

use crate::config::WorkerConfig;
use connectors::ConnectorRegistry;
use domain_jobs::models::WorkerInfo;
use tracing::{info, warn};

/// Probe every registered connector and assemble the worker record.
///
/// A connector whose probe fails is kept out of the advertised services;
/// the worker still starts with whatever answered.
pub async fn discover(config: &WorkerConfig, registry: &ConnectorRegistry) -> WorkerInfo {
    let mut worker = WorkerInfo::new(&config.worker_id, &config.machine_id);
    worker.hardware = config.hardware.clone();
    worker.customer_access = config.customer_access.clone();
    worker.custom = config.custom_capabilities.clone();

    for (service, connector) in registry.iter() {
        match connector.probe().await {
            Ok(report) if report.healthy => {
                info!(
                    service = %service,
                    models = report.models.len(),
                    "Connector probe succeeded"
                );
                worker.services.push(service.clone());
                if !report.models.is_empty() {
                    worker.models.insert(service.clone(), report.models);
                }
                for (key, value) in report.limits {
                    worker
                        .custom
                        .entry(format!("{}_{}", service, key))
                        .or_insert(value);
                }
            }
            Ok(_) => {
                warn!(service = %service, "Connector probe reported unhealthy, not advertising");
            }
            Err(e) => {
                warn!(service = %service, error = %e, "Connector probe failed, not advertising");
            }
        }
    }
    worker.services.sort();

    worker
}
