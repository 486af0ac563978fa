//! Grid Worker Service
//!
//! A pull-based worker that claims jobs from the Redis pending index and
//! executes them through service connectors.
//!
//! ## Architecture
//!
//! ```text
//! jobs:pending (sorted set)
//!   ↓ (atomic find-and-claim, Lua)
//! WorkerRuntime → JobExecutor → Connector (simulation / HTTP backend)
//!   ↓ (progress:{job}, attestations, counters)
//! events:lifecycle (stream) → hub broadcaster
//! ```
//!
//! ## Features
//!
//! - Capability advertisement from env + connector probes
//! - One job per slot, `WORKER_MAX_CONCURRENT_JOBS` slots
//! - Source-side progress throttling (~10 Hz per job)
//! - Heartbeats with janitor-driven orphan recovery on lapse
//! - Graceful drain on SIGINT/SIGTERM with shutdown attestations
//! - Health and metrics HTTP server for probes

pub mod capabilities;
pub mod config;
pub mod executor;
pub mod runtime;

pub use config::WorkerConfig;
pub use runtime::WorkerRuntime;

use axum_helpers::health::{HealthState, health_router};
use axum_helpers::metrics;
use connectors::{ConnectorRegistry, HttpConnector, HttpConnectorConfig, SimulationConnector};
use core_config::redis::RedisConfig;
use core_config::server::ServerConfig;
use core_config::{Environment, FromEnv, app_info};
use domain_jobs::progress::ProgressPublisher;
use domain_jobs::{AttestationWriter, EventBus, JobStore, Matcher, QueueConfig};
use executor::JobExecutor;
use eyre::{Result, WrapErr};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

/// Run the worker.
///
/// 1. Structured logging and metrics
/// 2. Configuration from the environment (identity is fatal when missing)
/// 3. Redis connection
/// 4. Connector registration and capability discovery
/// 5. Poll loop with graceful shutdown
pub async fn run() -> Result<()> {
    let environment = Environment::from_env();
    core_config::tracing::init_tracing(&environment);
    metrics::init_metrics();

    let app_info = app_info!();
    info!(name = %app_info.name, version = %app_info.version, "Starting grid worker");
    info!("Environment: {:?}", environment);

    let config = Arc::new(WorkerConfig::from_env().wrap_err("Failed to load worker configuration")?);
    let redis_config = RedisConfig::from_env().wrap_err("Failed to load Redis configuration")?;

    info!("Connecting to Redis...");
    let client = redis::Client::open(redis_config.url.clone())
        .wrap_err("Invalid Redis URL")?;
    let redis = redis::aio::ConnectionManager::new(client)
        .await
        .wrap_err("Failed to connect to Redis")?;
    info!("Connected to Redis successfully");

    // Connector registry: simulation is always available; the primary
    // service gets an HTTP connector when a backend URL is configured.
    let mut registry = ConnectorRegistry::new().with(Arc::new(SimulationConnector::default()));
    if let Some(backend_url) = &config.service_backend_url {
        let mut http_config =
            HttpConnectorConfig::new(config.service_name.clone(), backend_url.clone());
        http_config.auth_token = config.service_auth_token.clone();
        let connector = HttpConnector::new(http_config)
            .map_err(|e| eyre::eyre!("Failed to build HTTP connector: {}", e))?;
        registry.register(Arc::new(connector));
        info!(service = %config.service_name, backend = %backend_url, "HTTP connector registered");
    }

    let worker = capabilities::discover(&config, &registry).await;
    if worker.services.is_empty() {
        return Err(eyre::eyre!(
            "No connector passed its probe; refusing to start an unmatchable worker"
        ));
    }

    let queue_config = QueueConfig::default().with_max_scan(config.max_scan);
    let store = JobStore::new(redis.clone(), queue_config.clone());
    let matcher = Matcher::new(redis.clone());
    let bus = EventBus::new(redis.clone());
    let progress = ProgressPublisher::new(redis.clone(), &queue_config);
    let attestations = AttestationWriter::new(redis.clone(), &queue_config);
    let executor = JobExecutor::new(
        store.clone(),
        progress,
        attestations,
        bus.clone(),
        Arc::clone(&config),
    );

    let runtime = WorkerRuntime::new(
        store,
        matcher,
        executor,
        registry,
        worker,
        bus,
        Arc::clone(&config),
    );

    // Shutdown signal wiring
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        axum_helpers::shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    // Health and metrics server in the background
    let health_state = HealthState::new(redis, app_info.name, app_info.version);
    let health_config = ServerConfig::from_env_with_port_var("WORKER_HEALTH_PORT", 8082)
        .wrap_err("Failed to load health server configuration")?;
    tokio::spawn(async move {
        if let Err(e) = start_health_server(health_state, health_config).await {
            error!(error = %e, "Health server failed");
        }
    });

    runtime.start().await.wrap_err("Failed to register worker")?;
    runtime.run(shutdown_rx).await;

    info!("Grid worker stopped");
    Ok(())
}

/// Serve liveness/readiness/metrics endpoints.
async fn start_health_server(health_state: HealthState, config: ServerConfig) -> Result<()> {
    let app = health_router(health_state);

    let listener = TcpListener::bind(config.address())
        .await
        .wrap_err_with(|| format!("Failed to bind health server to {}", config.address()))?;

    info!(port = %config.port, "Health server listening");

    axum::serve(listener, app)
        .await
        .wrap_err("Health server failed")?;

    Ok(())
}
