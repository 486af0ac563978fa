//! Grid Hub Service
//!
//! The control plane of the orchestration grid:
//!
//! - Submission/control REST API (`/api/...`)
//! - Monitor WebSocket with topic subscriptions, replay and snapshots
//!   (`/ws/monitor`)
//! - Event pump: tails the `events:lifecycle` stream and fans out to
//!   monitors and webhooks
//! - Webhook delivery engine with signing, retry and audit
//! - Janitor: heartbeat-lapse recovery of in-flight jobs
//! - Periodic `system_stats` publishing
//!
//! Redis is the sole cross-process truth; the hub holds only the monitor
//! registry and the replay ring in memory.

pub mod api;
pub mod broadcast;
pub mod config;
pub mod janitor;
pub mod state;
pub mod stats;
pub mod ws;

pub use config::HubConfig;

use axum::Router;
use axum::routing::get;
use axum_helpers::health::{HealthState, health_router};
use axum_helpers::{metrics as app_metrics, server};
use broadcast::Broadcaster;
use core_config::redis::RedisConfig;
use core_config::{Environment, FromEnv, app_info};
use domain_jobs::{EventBus, ForensicsService, JobStore};
use domain_webhooks::{DeliveryEngine, DeliveryEngineConfig, WebhookStore};
use eyre::{Result, WrapErr};
use state::AppState;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Run the hub.
pub async fn run() -> Result<()> {
    let environment = Environment::from_env();
    core_config::tracing::init_tracing(&environment);
    app_metrics::init_metrics();

    let app_info = app_info!();
    info!(name = %app_info.name, version = %app_info.version, "Starting grid hub");
    info!("Environment: {:?}", environment);

    let config = Arc::new(HubConfig::from_env().wrap_err("Failed to load hub configuration")?);
    let redis_config = RedisConfig::from_env().wrap_err("Failed to load Redis configuration")?;

    info!("Connecting to Redis...");
    let client = redis::Client::open(redis_config.url.clone()).wrap_err("Invalid Redis URL")?;
    let redis = redis::aio::ConnectionManager::new(client)
        .await
        .wrap_err("Failed to connect to Redis")?;
    info!("Connected to Redis successfully");

    // Shutdown wiring shared by every background task.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn({
        let shutdown_tx = shutdown_tx.clone();
        async move {
            axum_helpers::shutdown_signal().await;
            let _ = shutdown_tx.send(true);
        }
    });

    let store = JobStore::new(redis.clone(), config.queue.clone());
    let forensics = ForensicsService::new(store.clone());
    let bus = EventBus::new(redis.clone());
    let broadcaster = Broadcaster::new(
        config.ring_capacity,
        config.monitor_queue_capacity,
        config.resync_max_events,
    );
    let webhook_store = WebhookStore::new(redis.clone());
    let webhook_engine = DeliveryEngine::start(
        webhook_store.clone(),
        DeliveryEngineConfig::default(),
        shutdown_rx.clone(),
    );

    let app_state = AppState {
        store,
        forensics,
        bus,
        broadcaster,
        webhook_store,
        webhook_engine,
        config: Arc::clone(&config),
    };

    // Event pump: stream -> monitors + webhooks.
    tokio::spawn(event_pump(app_state.clone(), shutdown_rx.clone()));

    // Monitor heartbeat sweep.
    tokio::spawn(monitor_sweeper(app_state.clone(), shutdown_rx.clone()));

    // Stale-worker janitor and stats publisher.
    tokio::spawn(janitor::run(app_state.clone(), shutdown_rx.clone()));
    tokio::spawn(stats::run(app_state.clone(), shutdown_rx.clone()));

    // HTTP surface: health + management API + monitor WebSocket.
    let health_state = HealthState::new(redis, app_info.name, app_info.version);
    let router = Router::new()
        .merge(health_router(health_state))
        .nest("/api", api::api_router(app_state.clone()))
        .route("/ws/monitor", get(ws::monitor_ws).with_state(app_state));

    server::create_app_with_shutdown(router, &config.server, {
        let mut shutdown_rx = shutdown_rx.clone();
        async move {
            let _ = shutdown_rx.changed().await;
        }
    })
    .await
    .wrap_err("Hub server failed")?;

    info!("Grid hub stopped");
    Ok(())
}

/// Tail the lifecycle stream and fan each event out to monitors and the
/// webhook engine, preserving stream order.
async fn event_pump(state: AppState, mut shutdown: watch::Receiver<bool>) {
    info!("Event pump started");
    // "$" starts at the stream head: the pump relays live traffic only;
    // history is served from the replay ring.
    let mut last_id = "$".to_string();

    loop {
        if *shutdown.borrow() {
            break;
        }

        let events = tokio::select! {
            events = state.bus.read_after(&last_id, 1_000, 100) => events,
            _ = shutdown.changed() => continue,
        };

        match events {
            Ok(events) => {
                for (entry_id, envelope) in events {
                    last_id = entry_id;
                    state.broadcaster.broadcast(envelope.clone()).await;
                    if let Err(e) = state.webhook_engine.offer(&envelope).await {
                        warn!(error = %e, "Webhook dispatch failed");
                    }
                }
            }
            Err(e) => {
                error!(error = %e, "Event pump read failed, backing off");
                tokio::time::sleep(std::time::Duration::from_secs(1)).await;
            }
        }
    }
    info!("Event pump stopped");
}

/// Remove monitors with stale heartbeats; ack the rest.
async fn monitor_sweeper(state: AppState, mut shutdown: watch::Receiver<bool>) {
    let interval = std::time::Duration::from_secs(state.config.monitor_sweep_interval_secs);
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
                continue;
            }
        }
        let removed = state
            .broadcaster
            .sweep(state.config.monitor_stale_threshold_secs)
            .await;
        if !removed.is_empty() {
            info!(count = removed.len(), "Removed stale monitors");
        }
    }
}
