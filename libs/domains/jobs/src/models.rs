//! Job and worker records.
//!
//! Records are stored as Redis hashes so any client can read them with
//! `HGETALL`. Scalar attributes map to individual hash fields; structured
//! attributes (payload, requirements, capability trees) are JSON-encoded
//! strings. `to_hash_fields` / `from_hash` are the only serialization
//! paths, shared by the store, the matcher script and the tests.

use crate::error::{FailureKind, JobError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use strum::{Display, EnumString};
use uuid::Uuid;

/// Current epoch timestamp in milliseconds (the wire time unit).
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Job lifecycle status.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Assigned,
    Active,
    Completed,
    Failed,
    Cancelling,
    Cancelled,
    Unworkable,
}

impl JobStatus {
    /// Terminal statuses admit no further worker activity.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Cancelled | Self::Unworkable
        )
    }
}

/// Worker lifecycle status.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum WorkerStatus {
    Idle,
    Busy,
    Offline,
    Error,
}

/// Customer isolation level, required by jobs and advertised by workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum CustomerIsolation {
    Strict,
    Loose,
    None,
}

/// Model requirement: either an explicit list or the `"all"` sentinel
/// (meaning "no model constraint").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ModelsRequirement {
    Sentinel(String),
    List(Vec<String>),
}

impl ModelsRequirement {
    pub fn is_all(&self) -> bool {
        matches!(self, Self::Sentinel(s) if s == "all")
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            Self::List(models) => Some(models),
            Self::Sentinel(_) => None,
        }
    }
}

/// Predicate over worker capabilities.
///
/// `hardware` values are numeric minima, or the string `"all"` to disable
/// a check. `extra` captures arbitrary user-defined requirement keys that
/// are compared structurally against the worker's capability tree.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobRequirements {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hardware: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub models: Option<ModelsRequirement>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_isolation: Option<CustomerIsolation>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl JobRequirements {
    pub fn is_empty(&self) -> bool {
        self.hardware.is_none()
            && self.models.is_none()
            && self.customer_isolation.is_none()
            && self.extra.is_empty()
    }
}

/// Customer access policy advertised by a worker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CustomerAccess {
    pub isolation: CustomerIsolation,
    #[serde(default)]
    pub allowed_customers: Vec<String>,
    #[serde(default)]
    pub denied_customers: Vec<String>,
}

impl Default for CustomerAccess {
    fn default() -> Self {
        Self {
            isolation: CustomerIsolation::None,
            allowed_customers: Vec::new(),
            denied_customers: Vec::new(),
        }
    }
}

/// A unit of work. "Step" is the preferred name in workflow contexts;
/// "job" remains the wire term.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub service_required: String,
    /// Explicit submission priority, when one was given.
    pub priority: Option<i64>,
    /// Resolved priority actually used for ordering: explicit priority if
    /// set, else the workflow's, else the configured default.
    pub effective_priority: i64,
    pub payload: Value,
    #[serde(default)]
    pub requirements: JobRequirements,
    pub customer_id: Option<String>,
    pub workflow_id: Option<String>,
    pub workflow_priority: Option<i64>,
    /// Workflow submission time (epoch ms); all steps of a workflow share
    /// it so they sort together.
    pub workflow_datetime: Option<i64>,
    pub step_number: Option<u32>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub created_at: i64,
    pub assigned_at: Option<i64>,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub failed_at: Option<i64>,
    pub status: JobStatus,
    pub worker_id: Option<String>,
    pub progress: Option<u8>,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub failure_kind: Option<FailureKind>,
    pub failure_count: u32,
}

impl Job {
    /// The timestamp used in the pending-index score: the workflow's
    /// submission time when the job belongs to one, else its own.
    pub fn sort_datetime(&self) -> i64 {
        self.workflow_datetime.unwrap_or(self.created_at)
    }

    /// Serialize to Redis hash fields. `None` fields are omitted entirely
    /// so `HGETALL` stays sparse.
    pub fn to_hash_fields(&self) -> Result<Vec<(String, String)>, JobError> {
        let mut fields: Vec<(String, String)> = vec![
            ("id".into(), self.id.clone()),
            ("service_required".into(), self.service_required.clone()),
            (
                "effective_priority".into(),
                self.effective_priority.to_string(),
            ),
            ("payload".into(), serde_json::to_string(&self.payload)?),
            ("retry_count".into(), self.retry_count.to_string()),
            ("max_retries".into(), self.max_retries.to_string()),
            ("created_at".into(), self.created_at.to_string()),
            ("status".into(), self.status.to_string()),
            ("failure_count".into(), self.failure_count.to_string()),
        ];
        if !self.requirements.is_empty() {
            fields.push((
                "requirements".into(),
                serde_json::to_string(&self.requirements)?,
            ));
        }
        if let Some(priority) = self.priority {
            fields.push(("priority".into(), priority.to_string()));
        }
        if let Some(customer_id) = &self.customer_id {
            fields.push(("customer_id".into(), customer_id.clone()));
        }
        if let Some(workflow_id) = &self.workflow_id {
            fields.push(("workflow_id".into(), workflow_id.clone()));
        }
        if let Some(workflow_priority) = self.workflow_priority {
            fields.push(("workflow_priority".into(), workflow_priority.to_string()));
        }
        if let Some(workflow_datetime) = self.workflow_datetime {
            fields.push(("workflow_datetime".into(), workflow_datetime.to_string()));
        }
        if let Some(step_number) = self.step_number {
            fields.push(("step_number".into(), step_number.to_string()));
        }
        if let Some(assigned_at) = self.assigned_at {
            fields.push(("assigned_at".into(), assigned_at.to_string()));
        }
        if let Some(started_at) = self.started_at {
            fields.push(("started_at".into(), started_at.to_string()));
        }
        if let Some(completed_at) = self.completed_at {
            fields.push(("completed_at".into(), completed_at.to_string()));
        }
        if let Some(failed_at) = self.failed_at {
            fields.push(("failed_at".into(), failed_at.to_string()));
        }
        if let Some(worker_id) = &self.worker_id {
            fields.push(("worker_id".into(), worker_id.clone()));
        }
        if let Some(progress) = self.progress {
            fields.push(("progress".into(), progress.to_string()));
        }
        if let Some(result) = &self.result {
            fields.push(("result".into(), serde_json::to_string(result)?));
        }
        if let Some(error) = &self.error {
            fields.push(("error".into(), error.clone()));
        }
        if let Some(kind) = self.failure_kind {
            fields.push(("failure_kind".into(), kind.as_str().to_string()));
        }
        Ok(fields)
    }

    /// Deserialize from a Redis hash. `key` is used for error context only.
    pub fn from_hash(key: &str, map: &HashMap<String, String>) -> Result<Self, JobError> {
        let corrupt = |details: String| JobError::CorruptRecord {
            key: key.to_string(),
            details,
        };

        let get = |field: &str| -> Result<&String, JobError> {
            map.get(field)
                .ok_or_else(|| corrupt(format!("missing field '{}'", field)))
        };
        let parse_i64 = |field: &str| -> Result<Option<i64>, JobError> {
            map.get(field)
                .map(|v| {
                    v.parse::<i64>()
                        .map_err(|e| corrupt(format!("field '{}': {}", field, e)))
                })
                .transpose()
        };
        let parse_u32 = |field: &str| -> Result<Option<u32>, JobError> {
            map.get(field)
                .map(|v| {
                    v.parse::<u32>()
                        .map_err(|e| corrupt(format!("field '{}': {}", field, e)))
                })
                .transpose()
        };

        let status: JobStatus = get("status")?
            .parse()
            .map_err(|_| corrupt(format!("unknown status '{}'", map["status"])))?;
        let requirements = match map.get("requirements") {
            Some(raw) => serde_json::from_str(raw)
                .map_err(|e| corrupt(format!("requirements: {}", e)))?,
            None => JobRequirements::default(),
        };
        let payload = match map.get("payload") {
            Some(raw) => {
                serde_json::from_str(raw).map_err(|e| corrupt(format!("payload: {}", e)))?
            }
            None => Value::Null,
        };
        let result = map
            .get("result")
            .map(|raw| serde_json::from_str(raw).map_err(|e| corrupt(format!("result: {}", e))))
            .transpose()?;

        Ok(Self {
            id: get("id")?.clone(),
            service_required: get("service_required")?.clone(),
            priority: parse_i64("priority")?,
            effective_priority: parse_i64("effective_priority")?
                .ok_or_else(|| corrupt("missing field 'effective_priority'".into()))?,
            payload,
            requirements,
            customer_id: map.get("customer_id").cloned(),
            workflow_id: map.get("workflow_id").cloned(),
            workflow_priority: parse_i64("workflow_priority")?,
            workflow_datetime: parse_i64("workflow_datetime")?,
            step_number: parse_u32("step_number")?,
            retry_count: parse_u32("retry_count")?.unwrap_or(0),
            max_retries: parse_u32("max_retries")?.unwrap_or(0),
            created_at: parse_i64("created_at")?
                .ok_or_else(|| corrupt("missing field 'created_at'".into()))?,
            assigned_at: parse_i64("assigned_at")?,
            started_at: parse_i64("started_at")?,
            completed_at: parse_i64("completed_at")?,
            failed_at: parse_i64("failed_at")?,
            status,
            worker_id: map.get("worker_id").cloned(),
            progress: parse_u32("progress")?.map(|p| p.min(100) as u8),
            result,
            error: map.get("error").cloned(),
            failure_kind: map
                .get("failure_kind")
                .and_then(|raw| FailureKind::parse(raw)),
            failure_count: parse_u32("failure_count")?.unwrap_or(0),
        })
    }
}

/// Submission payload accepted by the hub API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSubmission {
    /// Job id; generated when absent.
    pub id: Option<String>,
    pub service_required: String,
    pub priority: Option<i64>,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub requirements: JobRequirements,
    pub customer_id: Option<String>,
    pub workflow_id: Option<String>,
    pub workflow_priority: Option<i64>,
    pub workflow_datetime: Option<i64>,
    pub step_number: Option<u32>,
    pub max_retries: Option<u32>,
}

impl JobSubmission {
    pub fn new(service_required: impl Into<String>) -> Self {
        Self {
            id: None,
            service_required: service_required.into(),
            priority: None,
            payload: Value::Null,
            requirements: JobRequirements::default(),
            customer_id: None,
            workflow_id: None,
            workflow_priority: None,
            workflow_datetime: None,
            step_number: None,
            max_retries: None,
        }
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_requirements(mut self, requirements: JobRequirements) -> Self {
        self.requirements = requirements;
        self
    }

    pub fn with_workflow(
        mut self,
        workflow_id: impl Into<String>,
        workflow_priority: i64,
        workflow_datetime: i64,
        step_number: u32,
    ) -> Self {
        self.workflow_id = Some(workflow_id.into());
        self.workflow_priority = Some(workflow_priority);
        self.workflow_datetime = Some(workflow_datetime);
        self.step_number = Some(step_number);
        self
    }

    pub fn with_customer(mut self, customer_id: impl Into<String>) -> Self {
        self.customer_id = Some(customer_id.into());
        self
    }

    /// Materialize the canonical record. `default_priority` and
    /// `default_max_retries` come from queue configuration.
    pub fn into_job(self, default_priority: i64, default_max_retries: u32) -> Job {
        let effective_priority = self
            .priority
            .or(self.workflow_priority)
            .unwrap_or(default_priority);

        Job {
            id: self.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            service_required: self.service_required,
            priority: self.priority,
            effective_priority,
            payload: self.payload,
            requirements: self.requirements,
            customer_id: self.customer_id,
            workflow_id: self.workflow_id,
            workflow_priority: self.workflow_priority,
            workflow_datetime: self.workflow_datetime,
            step_number: self.step_number,
            retry_count: 0,
            max_retries: self.max_retries.unwrap_or(default_max_retries),
            created_at: now_ms(),
            assigned_at: None,
            started_at: None,
            completed_at: None,
            failed_at: None,
            status: JobStatus::Pending,
            worker_id: None,
            progress: None,
            result: None,
            error: None,
            failure_kind: None,
            failure_count: 0,
        }
    }
}

/// A worker registration: identity, capabilities and runtime state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerInfo {
    pub worker_id: String,
    pub machine_id: String,
    pub services: Vec<String>,
    /// Actual hardware values (numeric), compared against job minima.
    #[serde(default)]
    pub hardware: Map<String, Value>,
    /// Available models per service.
    #[serde(default)]
    pub models: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub customer_access: CustomerAccess,
    /// Arbitrary user-defined capability keys.
    #[serde(default)]
    pub custom: Map<String, Value>,
    pub status: WorkerStatus,
    pub current_job_id: Option<String>,
    pub connected_at: i64,
    pub last_heartbeat: i64,
    pub jobs_completed: u64,
    pub jobs_failed: u64,
    /// Cumulative active processing time in milliseconds.
    pub total_processing_time: u64,
}

impl WorkerInfo {
    pub fn new(worker_id: impl Into<String>, machine_id: impl Into<String>) -> Self {
        let now = now_ms();
        Self {
            worker_id: worker_id.into(),
            machine_id: machine_id.into(),
            services: Vec::new(),
            hardware: Map::new(),
            models: HashMap::new(),
            customer_access: CustomerAccess::default(),
            custom: Map::new(),
            status: WorkerStatus::Idle,
            current_job_id: None,
            connected_at: now,
            last_heartbeat: now,
            jobs_completed: 0,
            jobs_failed: 0,
            total_processing_time: 0,
        }
    }

    /// The capability document handed to the matcher. This is the exact
    /// JSON tree the claim script evaluates the predicate against; the
    /// worker runtime advertises nothing else.
    pub fn capability_document(&self) -> Value {
        let mut doc = Map::new();
        doc.insert("worker_id".into(), Value::String(self.worker_id.clone()));
        doc.insert("machine_id".into(), Value::String(self.machine_id.clone()));
        doc.insert(
            "services".into(),
            Value::Array(
                self.services
                    .iter()
                    .map(|s| Value::String(s.clone()))
                    .collect(),
            ),
        );
        doc.insert("hardware".into(), Value::Object(self.hardware.clone()));
        doc.insert(
            "models".into(),
            serde_json::to_value(&self.models).unwrap_or(Value::Null),
        );
        doc.insert(
            "customer_access".into(),
            serde_json::to_value(&self.customer_access).unwrap_or(Value::Null),
        );
        for (key, value) in &self.custom {
            doc.insert(key.clone(), value.clone());
        }
        Value::Object(doc)
    }

    pub fn to_hash_fields(&self) -> Result<Vec<(String, String)>, JobError> {
        let mut fields: Vec<(String, String)> = vec![
            ("worker_id".into(), self.worker_id.clone()),
            ("machine_id".into(), self.machine_id.clone()),
            ("services".into(), serde_json::to_string(&self.services)?),
            ("hardware".into(), serde_json::to_string(&self.hardware)?),
            ("models".into(), serde_json::to_string(&self.models)?),
            (
                "customer_access".into(),
                serde_json::to_string(&self.customer_access)?,
            ),
            ("custom".into(), serde_json::to_string(&self.custom)?),
            ("status".into(), self.status.to_string()),
            ("connected_at".into(), self.connected_at.to_string()),
            ("last_heartbeat".into(), self.last_heartbeat.to_string()),
            ("jobs_completed".into(), self.jobs_completed.to_string()),
            ("jobs_failed".into(), self.jobs_failed.to_string()),
            (
                "total_processing_time".into(),
                self.total_processing_time.to_string(),
            ),
        ];
        if let Some(current_job_id) = &self.current_job_id {
            fields.push(("current_job_id".into(), current_job_id.clone()));
        }
        Ok(fields)
    }

    pub fn from_hash(key: &str, map: &HashMap<String, String>) -> Result<Self, JobError> {
        let corrupt = |details: String| JobError::CorruptRecord {
            key: key.to_string(),
            details,
        };
        let get = |field: &str| -> Result<&String, JobError> {
            map.get(field)
                .ok_or_else(|| corrupt(format!("missing field '{}'", field)))
        };
        let parse_json = |field: &str| -> Result<Option<serde_json::Value>, JobError> {
            map.get(field)
                .map(|raw| {
                    serde_json::from_str(raw).map_err(|e| corrupt(format!("{}: {}", field, e)))
                })
                .transpose()
        };
        let parse_i64 = |field: &str, default: i64| -> Result<i64, JobError> {
            match map.get(field) {
                Some(raw) => raw
                    .parse()
                    .map_err(|e| corrupt(format!("field '{}': {}", field, e))),
                None => Ok(default),
            }
        };
        let parse_u64 = |field: &str| -> Result<u64, JobError> {
            match map.get(field) {
                Some(raw) => raw
                    .parse()
                    .map_err(|e| corrupt(format!("field '{}': {}", field, e))),
                None => Ok(0),
            }
        };

        let status: WorkerStatus = get("status")?
            .parse()
            .map_err(|_| corrupt(format!("unknown status '{}'", map["status"])))?;

        Ok(Self {
            worker_id: get("worker_id")?.clone(),
            machine_id: get("machine_id")?.clone(),
            services: parse_json("services")?
                .map(|v| serde_json::from_value(v).unwrap_or_default())
                .unwrap_or_default(),
            hardware: match parse_json("hardware")? {
                Some(Value::Object(map)) => map,
                _ => Map::new(),
            },
            models: parse_json("models")?
                .map(|v| serde_json::from_value(v).unwrap_or_default())
                .unwrap_or_default(),
            customer_access: parse_json("customer_access")?
                .map(|v| serde_json::from_value(v).unwrap_or_default())
                .unwrap_or_default(),
            custom: match parse_json("custom")? {
                Some(Value::Object(map)) => map,
                _ => Map::new(),
            },
            status,
            current_job_id: map.get("current_job_id").cloned(),
            connected_at: parse_i64("connected_at", 0)?,
            last_heartbeat: parse_i64("last_heartbeat", 0)?,
            jobs_completed: parse_u64("jobs_completed")?,
            jobs_failed: parse_u64("jobs_failed")?,
            total_processing_time: parse_u64("total_processing_time")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_job() -> Job {
        JobSubmission::new("comfyui")
            .with_priority(200)
            .with_payload(json!({"prompt": "a skyline at dusk"}))
            .with_workflow("wf-1", 150, 1_700_000_000_000, 2)
            .with_customer("cust-1")
            .into_job(50, 3)
    }

    #[test]
    fn test_job_hash_roundtrip() {
        let job = sample_job();
        let fields = job.to_hash_fields().unwrap();
        let map: HashMap<String, String> = fields.into_iter().collect();
        let restored = Job::from_hash("job:test", &map).unwrap();

        assert_eq!(restored.id, job.id);
        assert_eq!(restored.service_required, "comfyui");
        assert_eq!(restored.priority, Some(200));
        assert_eq!(restored.effective_priority, 200);
        assert_eq!(restored.workflow_id.as_deref(), Some("wf-1"));
        assert_eq!(restored.workflow_datetime, Some(1_700_000_000_000));
        assert_eq!(restored.step_number, Some(2));
        assert_eq!(restored.status, JobStatus::Pending);
        assert_eq!(restored.payload, json!({"prompt": "a skyline at dusk"}));
        assert_eq!(restored.customer_id.as_deref(), Some("cust-1"));
    }

    #[test]
    fn test_effective_priority_explicit_wins() {
        let job = JobSubmission::new("sim")
            .with_priority(200)
            .with_workflow("wf", 100, 0, 1)
            .into_job(50, 3);
        assert_eq!(job.effective_priority, 200);
    }

    #[test]
    fn test_effective_priority_inherits_workflow() {
        let job = JobSubmission::new("sim")
            .with_workflow("wf", 100, 0, 1)
            .into_job(50, 3);
        assert_eq!(job.priority, None);
        assert_eq!(job.effective_priority, 100);
    }

    #[test]
    fn test_effective_priority_default() {
        let job = JobSubmission::new("sim").into_job(50, 3);
        assert_eq!(job.effective_priority, 50);
    }

    #[test]
    fn test_sort_datetime_prefers_workflow() {
        let job = sample_job();
        assert_eq!(job.sort_datetime(), 1_700_000_000_000);

        let solo = JobSubmission::new("sim").into_job(50, 3);
        assert_eq!(solo.sort_datetime(), solo.created_at);
    }

    #[test]
    fn test_job_from_hash_missing_required_field() {
        let map = HashMap::from([("id".to_string(), "x".to_string())]);
        let result = Job::from_hash("job:x", &map);
        assert!(matches!(result, Err(JobError::CorruptRecord { .. })));
    }

    #[test]
    fn test_requirements_extra_keys_flatten() {
        let raw = json!({
            "hardware": {"gpu_memory_gb": 24},
            "models": ["sdxl"],
            "customer_isolation": "strict",
            "region": {"zone": "us-east"}
        });
        let req: JobRequirements = serde_json::from_value(raw).unwrap();
        assert!(req.hardware.is_some());
        assert_eq!(
            req.models,
            Some(ModelsRequirement::List(vec!["sdxl".to_string()]))
        );
        assert_eq!(req.customer_isolation, Some(CustomerIsolation::Strict));
        assert_eq!(req.extra["region"]["zone"], json!("us-east"));
    }

    #[test]
    fn test_models_requirement_all_sentinel() {
        let req: ModelsRequirement = serde_json::from_value(json!("all")).unwrap();
        assert!(req.is_all());
        assert!(req.as_list().is_none());
    }

    #[test]
    fn test_worker_hash_roundtrip() {
        let mut worker = WorkerInfo::new("worker-1", "machine-a");
        worker.services = vec!["comfyui".to_string(), "simulation".to_string()];
        worker.hardware.insert("gpu_memory_gb".into(), json!(24));
        worker
            .models
            .insert("comfyui".to_string(), vec!["sdxl".to_string()]);
        worker.current_job_id = Some("job-9".to_string());
        worker.jobs_completed = 12;

        let fields = worker.to_hash_fields().unwrap();
        let map: HashMap<String, String> = fields.into_iter().collect();
        let restored = WorkerInfo::from_hash("worker:worker-1", &map).unwrap();

        assert_eq!(restored.worker_id, "worker-1");
        assert_eq!(restored.services.len(), 2);
        assert_eq!(restored.hardware["gpu_memory_gb"], json!(24));
        assert_eq!(restored.current_job_id.as_deref(), Some("job-9"));
        assert_eq!(restored.jobs_completed, 12);
    }

    #[test]
    fn test_capability_document_contains_custom_keys() {
        let mut worker = WorkerInfo::new("worker-1", "machine-a");
        worker.services = vec!["simulation".to_string()];
        worker
            .custom
            .insert("region".into(), json!({"zone": "us-east"}));

        let doc = worker.capability_document();
        assert_eq!(doc["worker_id"], json!("worker-1"));
        assert_eq!(doc["services"], json!(["simulation"]));
        assert_eq!(doc["region"]["zone"], json!("us-east"));
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
        assert!(JobStatus::Unworkable.is_terminal());
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Assigned.is_terminal());
        assert!(!JobStatus::Active.is_terminal());
        assert!(!JobStatus::Cancelling.is_terminal());
    }
}
