//! Monitor broadcaster: subscriptions, fan-out, replay and snapshots.
//!
//! Events enter through `broadcast()` in the order the hub received them
//! and leave toward each monitor in that same order over a bounded
//! per-monitor queue. A monitor that cannot drain its queue is dropped
//! rather than allowed to block the emitter; it reconnects and resyncs
//! from its last seen timestamp.
//!
//! The retained history is an in-memory ring. Replay hands back events
//! strictly newer than the requested watermark, plus `has_more` and the
//! oldest retained timestamp so clients can tell when the window has
//! already slid past them.

use domain_jobs::events::{EventEnvelope, SystemStats};
use domain_jobs::models::{Job, WorkerInfo, now_ms};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, info, warn};

/// Filters a monitor can attach to its subscription.
///
/// A declared filter constrains only the events that carry the filtered
/// attribute; events without it still flow. Monitors watch heterogeneous
/// topics at once, so strict filtering would silence whole topics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MonitorFilters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_types: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_ids: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority_min: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority_max: Option<i64>,
}

impl MonitorFilters {
    fn passes(&self, envelope: &EventEnvelope) -> bool {
        if let (Some(job_types), Some(job_type)) = (&self.job_types, envelope.event.job_type()) {
            if !job_types.iter().any(|t| t == job_type) {
                return false;
            }
        }
        if let (Some(worker_ids), Some(worker_id)) = (&self.worker_ids, envelope.event.worker_id())
        {
            if !worker_ids.iter().any(|w| w == worker_id) {
                return false;
            }
        }
        if let Some(priority) = envelope.event.priority() {
            if self.priority_min.is_some_and(|min| priority < min) {
                return false;
            }
            if self.priority_max.is_some_and(|max| priority > max) {
                return false;
            }
        }
        true
    }
}

/// Response to a `resync_request`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResyncResponse {
    pub r#type: String,
    pub events: Vec<EventEnvelope>,
    pub has_more: bool,
    /// Oldest timestamp still retained; a monitor whose watermark is
    /// older than this has a gap and should take a snapshot.
    pub oldest_retained: Option<i64>,
}

/// On-demand full cluster state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FullStateSnapshot {
    pub r#type: String,
    pub timestamp: i64,
    pub workers: Vec<WorkerInfo>,
    pub jobs: SnapshotJobs,
    pub stats: SystemStats,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SnapshotJobs {
    pub pending: Vec<Job>,
    pub assigned: Vec<Job>,
    pub active: Vec<Job>,
    pub completed: Vec<Job>,
    pub failed: Vec<Job>,
    pub cancelled: Vec<Job>,
}

struct MonitorHandle {
    tx: mpsc::Sender<String>,
    topics: Vec<String>,
    filters: Option<MonitorFilters>,
    #[allow(dead_code)]
    connected_at: i64,
    last_heartbeat: i64,
}

impl MonitorHandle {
    fn wants(&self, envelope: &EventEnvelope) -> bool {
        let topics = envelope.event.topics();
        if !topics.iter().any(|t| self.topics.iter().any(|s| s == t)) {
            return false;
        }
        match &self.filters {
            Some(filters) => filters.passes(envelope),
            None => true,
        }
    }
}

struct Inner {
    ring: VecDeque<EventEnvelope>,
    monitors: HashMap<String, MonitorHandle>,
}

/// Shared broadcaster handle.
#[derive(Clone)]
pub struct Broadcaster {
    inner: Arc<RwLock<Inner>>,
    ring_capacity: usize,
    queue_capacity: usize,
    resync_max_events: usize,
}

impl Broadcaster {
    pub fn new(ring_capacity: usize, queue_capacity: usize, resync_max_events: usize) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner {
                ring: VecDeque::with_capacity(ring_capacity),
                monitors: HashMap::new(),
            })),
            ring_capacity,
            queue_capacity,
            resync_max_events,
        }
    }

    /// Register a monitor connection. Returns the receiving end of its
    /// outbound queue; the WebSocket task drains it into the socket.
    pub async fn register(&self, monitor_id: &str) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let now = now_ms();
        let mut inner = self.inner.write().await;
        inner.monitors.insert(
            monitor_id.to_string(),
            MonitorHandle {
                tx,
                topics: Vec::new(),
                filters: None,
                connected_at: now,
                last_heartbeat: now,
            },
        );
        metrics::gauge!("hub_monitors_connected").set(inner.monitors.len() as f64);
        info!(monitor_id = %monitor_id, "Monitor connected");
        rx
    }

    pub async fn unregister(&self, monitor_id: &str) {
        let mut inner = self.inner.write().await;
        if inner.monitors.remove(monitor_id).is_some() {
            metrics::gauge!("hub_monitors_connected").set(inner.monitors.len() as f64);
            info!(monitor_id = %monitor_id, "Monitor disconnected");
        }
    }

    /// Replace the monitor's subscription.
    pub async fn subscribe(
        &self,
        monitor_id: &str,
        topics: Vec<String>,
        filters: Option<MonitorFilters>,
    ) {
        let mut inner = self.inner.write().await;
        if let Some(monitor) = inner.monitors.get_mut(monitor_id) {
            debug!(monitor_id = %monitor_id, topics = ?topics, "Subscription updated");
            monitor.topics = topics;
            monitor.filters = filters;
        }
    }

    /// Record a heartbeat from a monitor.
    pub async fn heartbeat(&self, monitor_id: &str) {
        let mut inner = self.inner.write().await;
        if let Some(monitor) = inner.monitors.get_mut(monitor_id) {
            monitor.last_heartbeat = now_ms();
        }
    }

    /// Append to the ring and fan out to every interested monitor.
    /// Monitors with a full queue are dropped (slow-consumer policy).
    pub async fn broadcast(&self, envelope: EventEnvelope) {
        let mut inner = self.inner.write().await;

        if inner.ring.len() == self.ring_capacity {
            inner.ring.pop_front();
        }
        inner.ring.push_back(envelope.clone());

        let payload = match serde_json::to_string(&envelope) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "Failed to serialize event for monitors");
                return;
            }
        };

        let mut dropped = Vec::new();
        for (monitor_id, monitor) in &inner.monitors {
            if !monitor.wants(&envelope) {
                continue;
            }
            if monitor.tx.try_send(payload.clone()).is_err() {
                dropped.push(monitor_id.clone());
            }
        }
        for monitor_id in dropped {
            warn!(monitor_id = %monitor_id, "Monitor queue full, dropping connection");
            metrics::counter!("hub_monitors_dropped_total").increment(1);
            inner.monitors.remove(&monitor_id);
        }
        metrics::counter!("hub_events_broadcast_total").increment(1);
    }

    /// Events strictly newer than `since_ts`, in emitted order.
    pub async fn resync(&self, since_ts: i64, max_events: Option<usize>) -> ResyncResponse {
        let inner = self.inner.read().await;
        let cap = max_events
            .unwrap_or(self.resync_max_events)
            .min(self.resync_max_events);

        let mut events: Vec<EventEnvelope> = Vec::new();
        let mut has_more = false;
        for envelope in inner.ring.iter().filter(|e| e.timestamp > since_ts) {
            if events.len() == cap {
                has_more = true;
                break;
            }
            events.push(envelope.clone());
        }

        ResyncResponse {
            r#type: "resync_response".to_string(),
            events,
            has_more,
            oldest_retained: inner.ring.front().map(|e| e.timestamp),
        }
    }

    /// Deliver a payload to one monitor (ack, snapshot, resync response).
    pub async fn send_to(&self, monitor_id: &str, payload: String) -> bool {
        let inner = self.inner.read().await;
        match inner.monitors.get(monitor_id) {
            Some(monitor) => monitor.tx.try_send(payload).is_ok(),
            None => false,
        }
    }

    /// Sweep stale monitors and ack the fresh ones. Returns the ids that
    /// were removed.
    pub async fn sweep(&self, stale_threshold_secs: u64) -> Vec<String> {
        let cutoff = now_ms() - (stale_threshold_secs as i64 * 1_000);
        let ack = serde_json::json!({
            "type": "heartbeat_ack",
            "server_time": now_ms(),
        })
        .to_string();

        let mut inner = self.inner.write().await;
        let stale: Vec<String> = inner
            .monitors
            .iter()
            .filter(|(_, m)| m.last_heartbeat < cutoff)
            .map(|(id, _)| id.clone())
            .collect();

        for monitor_id in &stale {
            warn!(monitor_id = %monitor_id, "Monitor heartbeat stale, removing");
            inner.monitors.remove(monitor_id);
        }
        for monitor in inner.monitors.values() {
            let _ = monitor.tx.try_send(ack.clone());
        }
        metrics::gauge!("hub_monitors_connected").set(inner.monitors.len() as f64);
        stale
    }

    pub async fn monitor_count(&self) -> usize {
        self.inner.read().await.monitors.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain_jobs::events::LifecycleEvent;

    fn submitted(job_id: &str, ts: i64, priority: i64) -> EventEnvelope {
        EventEnvelope::at(
            ts,
            LifecycleEvent::JobSubmitted {
                job_id: job_id.into(),
                service_required: "simulation".into(),
                priority,
                workflow_id: None,
                customer_id: None,
            },
        )
    }

    fn broadcaster() -> Broadcaster {
        Broadcaster::new(4, 8, 100)
    }

    #[tokio::test]
    async fn test_subscribed_monitor_receives_events() {
        let b = broadcaster();
        let mut rx = b.register("m1").await;
        b.subscribe("m1", vec!["jobs".into()], None).await;

        b.broadcast(submitted("j1", 100, 50)).await;

        let raw = rx.recv().await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["type"], "job_submitted");
        assert_eq!(value["job_id"], "j1");
    }

    #[tokio::test]
    async fn test_topic_mismatch_is_filtered() {
        let b = broadcaster();
        let mut rx = b.register("m1").await;
        b.subscribe("m1", vec!["workers".into()], None).await;

        b.broadcast(submitted("j1", 100, 50)).await;
        // Nothing delivered; channel stays empty.
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_priority_filter() {
        let b = broadcaster();
        let mut rx = b.register("m1").await;
        b.subscribe(
            "m1",
            vec!["jobs".into()],
            Some(MonitorFilters {
                priority_min: Some(100),
                ..Default::default()
            }),
        )
        .await;

        b.broadcast(submitted("low", 100, 50)).await;
        b.broadcast(submitted("high", 101, 200)).await;

        let raw = rx.recv().await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["job_id"], "high");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_resync_returns_strictly_newer_in_order() {
        let b = broadcaster();
        b.broadcast(submitted("e1", 100, 50)).await;
        b.broadcast(submitted("e2", 200, 50)).await;
        b.broadcast(submitted("e3", 300, 50)).await;

        let resync = b.resync(150, None).await;
        assert_eq!(resync.events.len(), 2);
        assert_eq!(resync.events[0].timestamp, 200);
        assert_eq!(resync.events[1].timestamp, 300);
        assert!(!resync.has_more);
        assert_eq!(resync.oldest_retained, Some(100));
    }

    #[tokio::test]
    async fn test_resync_watermark_is_exclusive() {
        let b = broadcaster();
        b.broadcast(submitted("e1", 100, 50)).await;
        let resync = b.resync(100, None).await;
        assert!(resync.events.is_empty());
    }

    #[tokio::test]
    async fn test_resync_has_more_and_cap() {
        let b = broadcaster();
        for (i, ts) in [100, 200, 300].iter().enumerate() {
            b.broadcast(submitted(&format!("e{}", i), *ts, 50)).await;
        }
        let resync = b.resync(0, Some(2)).await;
        assert_eq!(resync.events.len(), 2);
        assert!(resync.has_more);
    }

    #[tokio::test]
    async fn test_ring_evicts_oldest() {
        let b = broadcaster(); // capacity 4
        for ts in [100, 200, 300, 400, 500] {
            b.broadcast(submitted("j", ts, 50)).await;
        }
        let resync = b.resync(0, None).await;
        assert_eq!(resync.events.len(), 4);
        assert_eq!(resync.oldest_retained, Some(200));
    }

    #[tokio::test]
    async fn test_slow_monitor_is_dropped() {
        let b = Broadcaster::new(16, 1, 100); // queue of 1
        let _rx = b.register("slow").await;
        b.subscribe("slow", vec!["jobs".into()], None).await;

        // First fills the queue; second finds it full and drops the
        // monitor. (_rx is held so the channel never closes early.)
        b.broadcast(submitted("j1", 100, 50)).await;
        b.broadcast(submitted("j2", 200, 50)).await;

        assert_eq!(b.monitor_count().await, 0);
    }

    #[tokio::test]
    async fn test_sweep_removes_stale_monitors() {
        let b = broadcaster();
        let _rx = b.register("m1").await;
        // A heartbeat threshold of zero makes every monitor stale.
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let removed = b.sweep(0).await;
        assert_eq!(removed, vec!["m1".to_string()]);
        assert_eq!(b.monitor_count().await, 0);
    }

    #[tokio::test]
    async fn test_sweep_acks_fresh_monitors() {
        let b = broadcaster();
        let mut rx = b.register("m1").await;
        let removed = b.sweep(60).await;
        assert!(removed.is_empty());

        let raw = rx.recv().await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["type"], "heartbeat_ack");
    }
}
