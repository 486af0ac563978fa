//! Prometheus metrics recorder.
//!
//! Binaries call `init_metrics()` once at startup; the health router's
//! `/metrics` endpoint renders the registry. Individual subsystems record
//! through the `metrics` facade macros.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder. Idempotent; call at startup.
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            PrometheusBuilder::new()
                .install_recorder()
                .expect("Failed to install Prometheus recorder")
        })
        .clone()
}

/// The installed handle, if `init_metrics` ran.
pub fn metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}
