//! Periodic `system_stats` publisher.

use crate::state::AppState;
use domain_jobs::events::{EventEnvelope, LifecycleEvent};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

pub async fn run(state: AppState, mut shutdown: watch::Receiver<bool>) {
    let interval = Duration::from_secs(state.config.stats_interval_secs);
    info!(
        interval_secs = state.config.stats_interval_secs,
        "Stats publisher started"
    );

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

        match state.store.stats().await {
            Ok(stats) => {
                metrics::gauge!("hub_pending_jobs").set(stats.pending_jobs as f64);
                metrics::gauge!("hub_active_jobs").set(stats.active_jobs as f64);
                metrics::gauge!("hub_workers_total").set(stats.workers_total as f64);

                let event = EventEnvelope::new(LifecycleEvent::SystemStats { stats });
                if let Err(e) = state.bus.publish(&event).await {
                    warn!(error = %e, "Failed to publish system stats");
                }
            }
            Err(e) => warn!(error = %e, "Failed to compute system stats"),
        }
    }
    info!("Stats publisher stopped");
}
