//! Jobs domain: the Redis-resident data plane of the orchestration grid.
//!
//! This crate owns everything that lives in Redis:
//! - Job and worker records (`models`), stored as hashes under the
//!   canonical key layout (`keys`)
//! - The pending index with its packed priority/FIFO score (`score`)
//! - The atomic capability matcher, a Lua script that observes and claims
//!   a pending job in a single Redis round-trip (`matcher`)
//! - The structural capability predicate (`capability`)
//! - Progress streams with source-side throttling (`progress`)
//! - Append-only attestation records and the forensic query layer
//!   (`attestation`, `forensics`)
//! - Lifecycle events fanned out by the hub and the webhook engine
//!   (`events`)

pub mod attestation;
pub mod bus;
pub mod capability;
pub mod config;
pub mod error;
pub mod events;
pub mod forensics;
pub mod keys;
pub mod matcher;
pub mod models;
pub mod progress;
pub mod score;
pub mod store;

pub use attestation::{Attestation, AttestationKind, AttestationWriter};
pub use bus::EventBus;
pub use capability::requirements_match;
pub use config::QueueConfig;
pub use error::{FailureKind, JobError};
pub use events::{EventEnvelope, LifecycleEvent, SystemStats};
pub use forensics::{ForensicsService, JobForensics, WorkflowForensics};
pub use matcher::Matcher;
pub use models::{
    CustomerAccess, CustomerIsolation, Job, JobRequirements, JobStatus, JobSubmission,
    ModelsRequirement, WorkerInfo, WorkerStatus,
};
pub use progress::{ProgressEntry, ProgressPublisher, ProgressThrottle, ProgressUpdate};
pub use score::{decode_score, encode_score};
pub use store::{CancelOutcome, JobStore};

/// Result type alias for data-plane operations.
pub type JobResult<T> = Result<T, JobError>;
