//! Atomic capability matcher.
//!
//! The find-and-claim routine runs entirely inside Redis as a Lua script
//! (`lua/find_matching_job.lua`): observing the scan window, evaluating
//! the predicate and claiming the winner happen in one script execution,
//! so concurrent matchers can never double-claim. A client-side
//! read-then-claim loop would not protect the `max_scan` observation and
//! is deliberately not offered.

use crate::error::JobError;
use crate::models::{Job, WorkerInfo, now_ms};
use redis::Script;
use redis::aio::ConnectionManager;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, instrument};

const FIND_MATCHING_JOB: &str = include_str!("lua/find_matching_job.lua");

/// Handle to the server-side claim routine.
///
/// Cloning is cheap; all clones share the script (loaded once via EVALSHA
/// caching inside the redis crate) and the connection manager.
#[derive(Clone)]
pub struct Matcher {
    redis: ConnectionManager,
    script: Arc<Script>,
}

impl Matcher {
    pub fn new(redis: ConnectionManager) -> Self {
        Self {
            redis,
            script: Arc::new(Script::new(FIND_MATCHING_JOB)),
        }
    }

    /// Find and atomically claim the best pending job this worker can run.
    ///
    /// Scans at most `max_scan` candidates in priority/FIFO order. Returns
    /// `None` when nothing in the window matches; the caller is expected
    /// to poll again after its interval.
    #[instrument(skip(self, worker), fields(worker_id = %worker.worker_id))]
    pub async fn find_matching_job(
        &self,
        worker: &WorkerInfo,
        max_scan: usize,
    ) -> Result<Option<Job>, JobError> {
        self.find_matching_job_raw(&worker.capability_document(), max_scan)
            .await
    }

    /// Same as [`find_matching_job`](Self::find_matching_job), taking the
    /// capability document directly. The document must be the exact JSON
    /// the worker advertises; the script trusts its `worker_id` field.
    pub async fn find_matching_job_raw(
        &self,
        capabilities: &Value,
        max_scan: usize,
    ) -> Result<Option<Job>, JobError> {
        if capabilities.get("worker_id").and_then(Value::as_str).is_none() {
            return Err(JobError::Validation(
                "capability document is missing worker_id".to_string(),
            ));
        }

        let mut conn = self.redis.clone();
        let caps_json = serde_json::to_string(capabilities)?;

        let raw: Option<String> = self
            .script
            .arg(caps_json)
            .arg(max_scan)
            .arg(now_ms().to_string())
            .invoke_async(&mut conn)
            .await?;

        match raw {
            Some(encoded) => {
                // The script returns the claimed job's hash fields as a
                // JSON object of strings; reuse the hash decoding path.
                let fields: HashMap<String, String> = serde_json::from_str(&encoded)?;
                let job = Job::from_hash("<claimed>", &fields)?;
                debug!(job_id = %job.id, "Claimed job");
                Ok(Some(job))
            }
            None => Ok(None),
        }
    }
}
