//! Worker configuration from environment variables.
//!
//! Identity (`WORKER_ID`, `MACHINE_ID`, `SERVICE_NAME`) is required and
//! fatal when missing. Everything else has production defaults.

use core_config::{ConfigError, FromEnv, env_or_default, env_parse_or, env_required};
use domain_jobs::models::{CustomerAccess, CustomerIsolation};
use serde_json::{Map, Value};

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub worker_id: String,
    pub machine_id: String,
    /// Primary service this worker is deployed for. Connectors may add
    /// more services beyond it.
    pub service_name: String,

    pub poll_interval_ms: u64,
    pub max_scan: usize,
    pub max_concurrent_jobs: usize,
    pub heartbeat_interval_secs: u64,
    /// Grace for draining in-flight jobs on shutdown.
    pub shutdown_grace_secs: u64,
    /// Grace between the cancel signal and force-termination.
    pub cancel_grace_secs: u64,
    /// How often the executor polls the cancellation marker.
    pub cancel_poll_ms: u64,

    /// Advertised hardware actuals.
    pub hardware: Map<String, Value>,
    pub customer_access: CustomerAccess,
    /// Arbitrary extra capability keys (`WORKER_CAPABILITIES` JSON blob).
    pub custom_capabilities: Map<String, Value>,

    /// Base URL for the primary service's HTTP backend; when unset only
    /// the simulation connector is registered.
    pub service_backend_url: Option<String>,
    pub service_auth_token: Option<String>,
}

impl FromEnv for WorkerConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let worker_id = env_required("WORKER_ID")?;
        let machine_id = env_required("MACHINE_ID")?;
        let service_name = env_required("SERVICE_NAME")?;

        let mut hardware = Map::new();
        for (var, field) in [
            ("GPU_MEMORY_GB", "gpu_memory_gb"),
            ("CPU_CORES", "cpu_cores"),
            ("RAM_GB", "ram_gb"),
        ] {
            let value: f64 = env_parse_or(var, 0.0)?;
            if value > 0.0 {
                hardware.insert(
                    field.to_string(),
                    serde_json::Number::from_f64(value)
                        .map(Value::Number)
                        .unwrap_or(Value::Null),
                );
            }
        }

        let isolation = match env_or_default("WORKER_ISOLATION", "none").to_lowercase().as_str() {
            "strict" => CustomerIsolation::Strict,
            "loose" => CustomerIsolation::Loose,
            _ => CustomerIsolation::None,
        };
        let customer_access = CustomerAccess {
            isolation,
            allowed_customers: csv_list(&env_or_default("WORKER_ALLOWED_CUSTOMERS", "")),
            denied_customers: csv_list(&env_or_default("WORKER_DENIED_CUSTOMERS", "")),
        };

        let custom_capabilities = match std::env::var("WORKER_CAPABILITIES") {
            Ok(raw) => match serde_json::from_str::<Value>(&raw) {
                Ok(Value::Object(map)) => map,
                Ok(_) => {
                    return Err(ConfigError::ParseError {
                        key: "WORKER_CAPABILITIES".to_string(),
                        details: "must be a JSON object".to_string(),
                    });
                }
                Err(e) => {
                    return Err(ConfigError::ParseError {
                        key: "WORKER_CAPABILITIES".to_string(),
                        details: e.to_string(),
                    });
                }
            },
            Err(_) => Map::new(),
        };

        Ok(Self {
            worker_id,
            machine_id,
            service_name,
            poll_interval_ms: env_parse_or("WORKER_POLL_INTERVAL_MS", 1_000)?,
            max_scan: env_parse_or("WORKER_MAX_SCAN", 50)?,
            max_concurrent_jobs: env_parse_or("WORKER_MAX_CONCURRENT_JOBS", 1usize)?.max(1),
            heartbeat_interval_secs: env_parse_or("WORKER_HEARTBEAT_INTERVAL_SECS", 15)?,
            shutdown_grace_secs: env_parse_or("WORKER_SHUTDOWN_GRACE_SECS", 30)?,
            cancel_grace_secs: env_parse_or("WORKER_CANCEL_GRACE_SECS", 30)?,
            cancel_poll_ms: env_parse_or("WORKER_CANCEL_POLL_MS", 1_000)?,
            hardware,
            customer_access,
            custom_capabilities,
            service_backend_url: std::env::var("SERVICE_BACKEND_URL").ok(),
            service_auth_token: std::env::var("SERVICE_AUTH_TOKEN").ok(),
        })
    }
}

fn csv_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_identity<F: FnOnce()>(f: F) {
        temp_env::with_vars(
            [
                ("WORKER_ID", Some("w1")),
                ("MACHINE_ID", Some("m1")),
                ("SERVICE_NAME", Some("simulation")),
            ],
            f,
        );
    }

    #[test]
    fn test_identity_is_required() {
        temp_env::with_vars(
            [
                ("WORKER_ID", None::<&str>),
                ("MACHINE_ID", Some("m1")),
                ("SERVICE_NAME", Some("simulation")),
            ],
            || {
                let result = WorkerConfig::from_env();
                assert!(result.is_err());
                assert!(result.unwrap_err().to_string().contains("WORKER_ID"));
            },
        );
    }

    #[test]
    fn test_defaults() {
        with_identity(|| {
            let config = WorkerConfig::from_env().unwrap();
            assert_eq!(config.poll_interval_ms, 1_000);
            assert_eq!(config.max_scan, 50);
            assert_eq!(config.max_concurrent_jobs, 1);
            assert_eq!(config.heartbeat_interval_secs, 15);
            assert_eq!(config.cancel_grace_secs, 30);
            assert!(config.hardware.is_empty());
        });
    }

    #[test]
    fn test_hardware_from_env() {
        with_identity(|| {
            temp_env::with_vars(
                [("GPU_MEMORY_GB", Some("24")), ("CPU_CORES", Some("16"))],
                || {
                    let config = WorkerConfig::from_env().unwrap();
                    assert_eq!(config.hardware["gpu_memory_gb"], serde_json::json!(24.0));
                    assert_eq!(config.hardware["cpu_cores"], serde_json::json!(16.0));
                    assert!(!config.hardware.contains_key("ram_gb"));
                },
            );
        });
    }

    #[test]
    fn test_customer_access_lists() {
        with_identity(|| {
            temp_env::with_vars(
                [
                    ("WORKER_ISOLATION", Some("strict")),
                    ("WORKER_ALLOWED_CUSTOMERS", Some("c1, c2")),
                    ("WORKER_DENIED_CUSTOMERS", Some("c3")),
                ],
                || {
                    let config = WorkerConfig::from_env().unwrap();
                    assert_eq!(config.customer_access.isolation, CustomerIsolation::Strict);
                    assert_eq!(config.customer_access.allowed_customers, vec!["c1", "c2"]);
                    assert_eq!(config.customer_access.denied_customers, vec!["c3"]);
                },
            );
        });
    }

    #[test]
    fn test_invalid_capabilities_blob_is_fatal() {
        with_identity(|| {
            temp_env::with_var("WORKER_CAPABILITIES", Some("[1,2,3]"), || {
                let result = WorkerConfig::from_env();
                assert!(result.is_err());
            });
        });
    }
}
