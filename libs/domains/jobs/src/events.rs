//! Lifecycle events.
//!
//! Every observable transition in the data plane is described by a
//! `LifecycleEvent`. The hub broadcaster fans envelopes out to monitors,
//! and the webhook engine matches them against registrations. Events are
//! tagged with topic strings so monitor subscriptions can filter
//! server-side.

use crate::error::FailureKind;
use crate::models::{JobStatus, WorkerStatus, now_ms};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Topic tags monitors can subscribe to.
pub mod topics {
    pub const WORKERS: &str = "workers";
    pub const JOBS: &str = "jobs";
    pub const JOBS_STATUS: &str = "jobs:status";
    pub const JOBS_PROGRESS: &str = "jobs:progress";
    pub const SYSTEM_STATS: &str = "system_stats";
    pub const HEARTBEAT: &str = "heartbeat";
}

/// Cluster-wide counters pushed periodically to monitors.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemStats {
    pub pending_jobs: u64,
    pub active_jobs: u64,
    pub completed_total: u64,
    pub failed_total: u64,
    pub workers_total: u64,
    pub workers_idle: u64,
    pub workers_busy: u64,
    pub workers_offline: u64,
}

/// A lifecycle transition, tagged for the wire with a `type` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LifecycleEvent {
    WorkerConnected {
        worker_id: String,
        machine_id: String,
        services: Vec<String>,
    },
    WorkerDisconnected {
        worker_id: String,
        reason: Option<String>,
    },
    WorkerStatusChanged {
        worker_id: String,
        status: WorkerStatus,
        current_job_id: Option<String>,
    },
    JobSubmitted {
        job_id: String,
        service_required: String,
        priority: i64,
        workflow_id: Option<String>,
        customer_id: Option<String>,
    },
    JobAssigned {
        job_id: String,
        worker_id: String,
    },
    JobStatusChanged {
        job_id: String,
        status: JobStatus,
        worker_id: Option<String>,
    },
    UpdateJobProgress {
        job_id: String,
        worker_id: String,
        progress: u8,
        message: Option<String>,
        current_step: Option<u32>,
        total_steps: Option<u32>,
    },
    CompleteJob {
        job_id: String,
        worker_id: String,
        result: Option<Value>,
    },
    JobFailed {
        job_id: String,
        worker_id: Option<String>,
        error: String,
        failure_kind: FailureKind,
        will_retry: bool,
    },
    SystemStats {
        stats: SystemStats,
    },
    HeartbeatAck {
        server_time: i64,
    },
    /// Synthetic event emitted by `POST /webhooks/{id}/test`.
    WebhookTest {
        webhook_id: String,
    },
}

impl LifecycleEvent {
    /// The wire name, identical to the serde tag.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::WorkerConnected { .. } => "worker_connected",
            Self::WorkerDisconnected { .. } => "worker_disconnected",
            Self::WorkerStatusChanged { .. } => "worker_status_changed",
            Self::JobSubmitted { .. } => "job_submitted",
            Self::JobAssigned { .. } => "job_assigned",
            Self::JobStatusChanged { .. } => "job_status_changed",
            Self::UpdateJobProgress { .. } => "update_job_progress",
            Self::CompleteJob { .. } => "complete_job",
            Self::JobFailed { .. } => "job_failed",
            Self::SystemStats { .. } => "system_stats",
            Self::HeartbeatAck { .. } => "heartbeat_ack",
            Self::WebhookTest { .. } => "webhook_test",
        }
    }

    /// Topics this event is delivered under.
    pub fn topics(&self) -> &'static [&'static str] {
        match self {
            Self::WorkerConnected { .. }
            | Self::WorkerDisconnected { .. }
            | Self::WorkerStatusChanged { .. } => &[topics::WORKERS],
            Self::JobSubmitted { .. } | Self::JobAssigned { .. } => &[topics::JOBS],
            Self::JobStatusChanged { .. } | Self::CompleteJob { .. } | Self::JobFailed { .. } => {
                &[topics::JOBS, topics::JOBS_STATUS]
            }
            Self::UpdateJobProgress { .. } => &[topics::JOBS, topics::JOBS_PROGRESS],
            Self::SystemStats { .. } => &[topics::SYSTEM_STATS],
            Self::HeartbeatAck { .. } => &[topics::HEARTBEAT],
            Self::WebhookTest { .. } => &[],
        }
    }

    /// Job id, for events that concern one.
    pub fn job_id(&self) -> Option<&str> {
        match self {
            Self::JobSubmitted { job_id, .. }
            | Self::JobAssigned { job_id, .. }
            | Self::JobStatusChanged { job_id, .. }
            | Self::UpdateJobProgress { job_id, .. }
            | Self::CompleteJob { job_id, .. }
            | Self::JobFailed { job_id, .. } => Some(job_id),
            _ => None,
        }
    }

    /// Worker id, for events that carry one.
    pub fn worker_id(&self) -> Option<&str> {
        match self {
            Self::WorkerConnected { worker_id, .. }
            | Self::WorkerDisconnected { worker_id, .. }
            | Self::WorkerStatusChanged { worker_id, .. }
            | Self::JobAssigned { worker_id, .. }
            | Self::UpdateJobProgress { worker_id, .. }
            | Self::CompleteJob { worker_id, .. } => Some(worker_id),
            Self::JobFailed { worker_id, .. } => worker_id.as_deref(),
            Self::JobStatusChanged { worker_id, .. } => worker_id.as_deref(),
            _ => None,
        }
    }

    /// Effective priority, for submission events (webhook priority filters).
    pub fn priority(&self) -> Option<i64> {
        match self {
            Self::JobSubmitted { priority, .. } => Some(*priority),
            _ => None,
        }
    }

    /// Service name, for events that concern a job type.
    pub fn job_type(&self) -> Option<&str> {
        match self {
            Self::JobSubmitted {
                service_required, ..
            } => Some(service_required),
            _ => None,
        }
    }
}

/// Stamped, uniquely-identified event as it travels the wire.
///
/// The envelope flattens around the event, so the serialized form is
/// `{"event_id": ..., "timestamp": ..., "type": ..., ...fields}`. Field
/// order is fixed by the struct definition, which is what webhook
/// signatures are computed over.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event_id: String,
    /// Emission time, epoch ms. Non-decreasing per emitter.
    pub timestamp: i64,
    #[serde(flatten)]
    pub event: LifecycleEvent,
}

impl EventEnvelope {
    pub fn new(event: LifecycleEvent) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            timestamp: now_ms(),
            event,
        }
    }

    /// Envelope with an explicit timestamp (replayed or test events).
    pub fn at(timestamp: i64, event: LifecycleEvent) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            timestamp,
            event,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_type_matches_serde_tag() {
        let event = LifecycleEvent::JobAssigned {
            job_id: "j1".into(),
            worker_id: "w1".into(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], json!(event.event_type()));
    }

    #[test]
    fn test_envelope_flattens_event() {
        let envelope = EventEnvelope::at(
            123,
            LifecycleEvent::JobSubmitted {
                job_id: "j1".into(),
                service_required: "comfyui".into(),
                priority: 200,
                workflow_id: None,
                customer_id: None,
            },
        );
        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(value["timestamp"], json!(123));
        assert_eq!(value["type"], json!("job_submitted"));
        assert_eq!(value["job_id"], json!("j1"));
        assert!(value["event_id"].is_string());
    }

    #[test]
    fn test_topics() {
        let progress = LifecycleEvent::UpdateJobProgress {
            job_id: "j1".into(),
            worker_id: "w1".into(),
            progress: 40,
            message: None,
            current_step: None,
            total_steps: None,
        };
        assert!(progress.topics().contains(&topics::JOBS_PROGRESS));
        assert!(progress.topics().contains(&topics::JOBS));

        let stats = LifecycleEvent::SystemStats {
            stats: SystemStats::default(),
        };
        assert_eq!(stats.topics(), &[topics::SYSTEM_STATS]);
    }

    #[test]
    fn test_accessors() {
        let event = LifecycleEvent::JobFailed {
            job_id: "j1".into(),
            worker_id: Some("w1".into()),
            error: "boom".into(),
            failure_kind: FailureKind::TransientNetwork,
            will_retry: true,
        };
        assert_eq!(event.job_id(), Some("j1"));
        assert_eq!(event.worker_id(), Some("w1"));
        assert_eq!(event.priority(), None);
    }

    #[test]
    fn test_envelope_roundtrip() {
        let envelope = EventEnvelope::new(LifecycleEvent::HeartbeatAck { server_time: 42 });
        let raw = serde_json::to_string(&envelope).unwrap();
        let restored: EventEnvelope = serde_json::from_str(&raw).unwrap();
        assert_eq!(restored, envelope);
    }
}
