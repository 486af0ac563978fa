//! Worker runtime: registration, poll loop, heartbeat, drain shutdown.

use crate::config::WorkerConfig;
use crate::executor::JobExecutor;
use connectors::ConnectorRegistry;
use domain_jobs::events::{EventEnvelope, LifecycleEvent};
use domain_jobs::models::{WorkerInfo, WorkerStatus};
use domain_jobs::{EventBus, JobStore, Matcher};
use rand::RngExt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// One worker process: polls the matcher, executes matches through the
/// connector registry, heartbeats, and drains cleanly on shutdown.
pub struct WorkerRuntime {
    store: JobStore,
    matcher: Matcher,
    executor: JobExecutor,
    registry: ConnectorRegistry,
    worker: WorkerInfo,
    bus: EventBus,
    config: Arc<WorkerConfig>,
    in_flight: Arc<AtomicUsize>,
    /// Drain signal handed to every execution; flipped when the grace
    /// period expires during shutdown.
    drain_tx: watch::Sender<bool>,
    drain_rx: watch::Receiver<bool>,
}

impl WorkerRuntime {
    pub fn new(
        store: JobStore,
        matcher: Matcher,
        executor: JobExecutor,
        registry: ConnectorRegistry,
        worker: WorkerInfo,
        bus: EventBus,
        config: Arc<WorkerConfig>,
    ) -> Self {
        let (drain_tx, drain_rx) = watch::channel(false);
        Self {
            store,
            matcher,
            executor,
            registry,
            worker,
            bus,
            config,
            in_flight: Arc::new(AtomicUsize::new(0)),
            drain_tx,
            drain_rx,
        }
    }

    /// The capability snapshot the matcher evaluates; identical to the
    /// registered record.
    pub fn capabilities(&self) -> serde_json::Value {
        self.worker.capability_document()
    }

    /// Register the worker record and announce it. Idempotent: a
    /// re-registration overwrites the previous record.
    pub async fn start(&self) -> Result<(), domain_jobs::JobError> {
        self.store.register_worker(&self.worker).await?;
        self.emit(LifecycleEvent::WorkerConnected {
            worker_id: self.worker.worker_id.clone(),
            machine_id: self.worker.machine_id.clone(),
            services: self.worker.services.clone(),
        })
        .await;
        Ok(())
    }

    /// Run the poll loop until `shutdown` flips, then drain.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            worker_id = %self.worker.worker_id,
            services = ?self.worker.services,
            max_concurrent_jobs = %self.config.max_concurrent_jobs,
            poll_interval_ms = %self.config.poll_interval_ms,
            "Worker poll loop started"
        );

        let slots = Arc::new(Semaphore::new(self.config.max_concurrent_jobs));
        let mut executions: JoinSet<()> = JoinSet::new();
        let heartbeat = self.spawn_heartbeat(shutdown.clone());

        // Track consecutive errors for exponential backoff
        let mut consecutive_errors: u32 = 0;
        const MAX_BACKOFF_SECS: u64 = 30;

        loop {
            if *shutdown.borrow() {
                info!("Received shutdown signal, stopping poll loop");
                break;
            }

            // Reap finished executions without blocking.
            while executions.try_join_next().is_some() {}

            // Wait for a free slot; a shutdown mid-wait exits the loop.
            let permit = tokio::select! {
                permit = slots.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
                _ = shutdown.changed() => continue,
            };

            match self
                .matcher
                .find_matching_job(&self.worker, self.config.max_scan)
                .await
            {
                Ok(Some(job)) => {
                    if consecutive_errors > 0 {
                        info!("Matcher recovered after {} errors", consecutive_errors);
                        consecutive_errors = 0;
                    }

                    let Some(connector) = self.registry.get(&job.service_required) else {
                        // The matcher only matches advertised services, so
                        // this means the registry changed underneath us.
                        error!(
                            job_id = %job.id,
                            service = %job.service_required,
                            "No connector for claimed job, requeueing"
                        );
                        drop(permit);
                        let _ = self
                            .store
                            .fail_job(
                                &job.id,
                                Some(&self.worker.worker_id),
                                "claimed by worker without connector",
                                domain_jobs::FailureKind::WorkerCrash,
                                true,
                            )
                            .await;
                        continue;
                    };

                    self.emit(LifecycleEvent::JobAssigned {
                        job_id: job.id.clone(),
                        worker_id: self.worker.worker_id.clone(),
                    })
                    .await;

                    metrics::counter!("worker_jobs_claimed_total").increment(1);
                    let executor = self.executor.clone();
                    let drain_rx = self.drain_rx.clone();
                    let in_flight = Arc::clone(&self.in_flight);
                    in_flight.fetch_add(1, Ordering::SeqCst);
                    executions.spawn(async move {
                        executor.execute(job, connector, drain_rx).await;
                        in_flight.fetch_sub(1, Ordering::SeqCst);
                        drop(permit);
                    });
                }
                Ok(None) => {
                    drop(permit);
                    if consecutive_errors > 0 {
                        consecutive_errors = 0;
                    }
                    // Idle: wait out the poll interval with jitter so a
                    // fleet of workers does not stampede the index.
                    let jitter = rand::rng().random_range(0..=self.config.poll_interval_ms / 4);
                    let sleep = Duration::from_millis(self.config.poll_interval_ms + jitter);
                    tokio::select! {
                        _ = shutdown.changed() => {}
                        _ = tokio::time::sleep(sleep) => {}
                    }
                }
                Err(e) => {
                    drop(permit);
                    consecutive_errors += 1;
                    let backoff_secs =
                        std::cmp::min(2u64.pow(consecutive_errors.min(5)), MAX_BACKOFF_SECS);
                    if e.is_connection_error() {
                        warn!(
                            error = %e,
                            consecutive_errors = %consecutive_errors,
                            backoff_secs = %backoff_secs,
                            "Redis connection error in matcher, backing off"
                        );
                    } else {
                        error!(error = %e, "Matcher call failed");
                    }
                    tokio::select! {
                        _ = shutdown.changed() => {}
                        _ = tokio::time::sleep(Duration::from_secs(backoff_secs)) => {}
                    }
                }
            }
        }

        self.drain(executions).await;
        heartbeat.abort();
        info!(worker_id = %self.worker.worker_id, "Worker stopped");
    }

    /// Finish in-flight jobs within the grace period; anything still
    /// running afterwards is cancelled and requeued by its executor.
    async fn drain(&self, mut executions: JoinSet<()>) {
        let in_flight = self.in_flight.load(Ordering::SeqCst);
        if in_flight > 0 {
            info!(
                in_flight = in_flight,
                grace_secs = self.config.shutdown_grace_secs,
                "Draining in-flight jobs"
            );
            let grace = Duration::from_secs(self.config.shutdown_grace_secs);
            if tokio::time::timeout(grace, async {
                while executions.join_next().await.is_some() {}
            })
            .await
            .is_err()
            {
                warn!("Drain grace expired, cancelling remaining jobs");
                let _ = self.drain_tx.send(true);
                // Executors observe the drain signal, requeue their jobs
                // and settle; give them the cancel grace plus margin.
                let settle =
                    Duration::from_secs(self.config.cancel_grace_secs.saturating_add(5));
                let _ = tokio::time::timeout(settle, async {
                    while executions.join_next().await.is_some() {}
                })
                .await;
            }
        }

        if let Err(e) = self.store.deregister_worker(&self.worker.worker_id).await {
            error!(error = %e, "Failed to deregister worker");
        }
        self.emit(LifecycleEvent::WorkerDisconnected {
            worker_id: self.worker.worker_id.clone(),
            reason: Some("shutdown".to_string()),
        })
        .await;
    }

    fn spawn_heartbeat(&self, mut shutdown: watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
        let store = self.store.clone();
        let worker_id = self.worker.worker_id.clone();
        let in_flight = Arc::clone(&self.in_flight);
        let interval = Duration::from_secs(self.config.heartbeat_interval_secs);

        tokio::spawn(async move {
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

                let status = if in_flight.load(Ordering::SeqCst) > 0 {
                    WorkerStatus::Busy
                } else {
                    WorkerStatus::Idle
                };
                if let Err(e) = store.heartbeat(&worker_id, status).await {
                    warn!(worker_id = %worker_id, error = %e, "Heartbeat failed");
                } else {
                    debug!(worker_id = %worker_id, status = %status, "Heartbeat");
                }
            }
        })
    }

    async fn emit(&self, event: LifecycleEvent) {
        if let Err(e) = self.bus.publish(&EventEnvelope::new(event)).await {
            warn!(error = %e, "Failed to publish lifecycle event");
        }
    }
}
