//! Progress streams.
//!
//! Each running job has an append-only stream `progress:{job_id}`. The
//! owning worker is the only writer; ticks are throttled at the source so
//! the broadcaster never sees more than one event per job per throttle
//! window (~10 Hz by default), regardless of how chatty a connector is.

use crate::config::QueueConfig;
use crate::error::JobError;
use crate::keys;
use crate::models::now_ms;
use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::debug;

/// One progress tick reported by a connector.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub percent: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_step: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_steps: Option<u32>,
    /// Estimated completion time, epoch ms.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_completion: Option<i64>,
}

impl ProgressUpdate {
    pub fn percent(percent: u8) -> Self {
        Self {
            percent: percent.min(100),
            ..Default::default()
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_steps(mut self, current: u32, total: u32) -> Self {
        self.current_step = Some(current);
        self.total_steps = Some(total);
        self
    }
}

/// An entry read back from a progress stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEntry {
    /// Redis stream entry id.
    pub entry_id: String,
    pub timestamp: i64,
    pub percent: u8,
    pub status: Option<String>,
    pub message: Option<String>,
    pub worker_id: Option<String>,
}

/// Source-side throttle: at most one emitted tick per interval, with
/// terminal ticks (100%) always passing.
#[derive(Debug)]
pub struct ProgressThrottle {
    min_interval: Duration,
    last_emit: Option<Instant>,
}

impl ProgressThrottle {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_emit: None,
        }
    }

    pub fn from_config(config: &QueueConfig) -> Self {
        Self::new(Duration::from_millis(config.progress_throttle_ms))
    }

    /// Whether a tick at `percent` should be emitted now. Records the
    /// emission when it passes.
    pub fn admit(&mut self, percent: u8) -> bool {
        let now = Instant::now();
        let pass = percent >= 100
            || match self.last_emit {
                Some(last) => now.duration_since(last) >= self.min_interval,
                None => true,
            };
        if pass {
            self.last_emit = Some(now);
        }
        pass
    }
}

/// Writer/reader for `progress:{job_id}` streams.
#[derive(Clone)]
pub struct ProgressPublisher {
    redis: ConnectionManager,
    max_len: i64,
}

impl ProgressPublisher {
    pub fn new(redis: ConnectionManager, config: &QueueConfig) -> Self {
        Self {
            redis,
            max_len: config.progress_stream_max_len,
        }
    }

    /// Append a tick to the stream and mirror the percentage onto the job
    /// record. Returns the stream entry id.
    pub async fn publish(
        &self,
        job_id: &str,
        worker_id: &str,
        update: &ProgressUpdate,
    ) -> Result<String, JobError> {
        let mut conn = self.redis.clone();
        let now = now_ms();

        let mut cmd = redis::cmd("XADD");
        cmd.arg(keys::progress(job_id))
            .arg("MAXLEN")
            .arg("~")
            .arg(self.max_len)
            .arg("*")
            .arg("percent")
            .arg(update.percent.min(100))
            .arg("worker_id")
            .arg(worker_id)
            .arg("timestamp")
            .arg(now);
        if let Some(message) = &update.message {
            cmd.arg("message").arg(message);
        }
        if let Some(step) = update.current_step {
            cmd.arg("current_step").arg(step);
        }
        if let Some(total) = update.total_steps {
            cmd.arg("total_steps").arg(total);
        }
        if let Some(eta) = update.estimated_completion {
            cmd.arg("estimated_completion").arg(eta);
        }

        let entry_id: String = cmd.query_async(&mut conn).await?;

        let _: () = redis::cmd("HSET")
            .arg(keys::job(job_id))
            .arg("progress")
            .arg(update.percent.min(100))
            .query_async(&mut conn)
            .await?;

        debug!(job_id = %job_id, percent = %update.percent, "Progress recorded");
        Ok(entry_id)
    }

    /// Read the full progress history of a job, oldest first.
    pub async fn history(&self, job_id: &str, limit: usize) -> Result<Vec<ProgressEntry>, JobError> {
        let mut conn = self.redis.clone();
        let reply: redis::streams::StreamRangeReply = redis::cmd("XRANGE")
            .arg(keys::progress(job_id))
            .arg("-")
            .arg("+")
            .arg("COUNT")
            .arg(limit)
            .query_async(&mut conn)
            .await?;

        let mut entries = Vec::with_capacity(reply.ids.len());
        for item in reply.ids {
            let fields: HashMap<String, String> = item
                .map
                .iter()
                .filter_map(|(k, v)| match v {
                    redis::Value::BulkString(bytes) => {
                        Some((k.clone(), String::from_utf8_lossy(bytes).to_string()))
                    }
                    redis::Value::SimpleString(s) => Some((k.clone(), s.clone())),
                    _ => None,
                })
                .collect();

            entries.push(ProgressEntry {
                entry_id: item.id.clone(),
                timestamp: fields
                    .get("timestamp")
                    .and_then(|t| t.parse().ok())
                    .unwrap_or(0),
                percent: fields
                    .get("percent")
                    .and_then(|p| p.parse().ok())
                    .unwrap_or(0),
                status: fields.get("status").cloned(),
                message: fields.get("message").cloned(),
                worker_id: fields.get("worker_id").cloned(),
            });
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_throttle_admits_first_tick() {
        let mut throttle = ProgressThrottle::new(Duration::from_millis(100));
        assert!(throttle.admit(10));
    }

    #[test]
    fn test_throttle_suppresses_rapid_ticks() {
        let mut throttle = ProgressThrottle::new(Duration::from_secs(60));
        assert!(throttle.admit(10));
        assert!(!throttle.admit(11));
        assert!(!throttle.admit(12));
    }

    #[test]
    fn test_throttle_always_admits_terminal_tick() {
        let mut throttle = ProgressThrottle::new(Duration::from_secs(60));
        assert!(throttle.admit(10));
        assert!(throttle.admit(100));
    }

    #[test]
    fn test_throttle_admits_after_interval() {
        let mut throttle = ProgressThrottle::new(Duration::from_millis(0));
        assert!(throttle.admit(10));
        assert!(throttle.admit(11));
    }

    #[test]
    fn test_progress_update_builder() {
        let update = ProgressUpdate::percent(150)
            .with_message("denoising")
            .with_steps(3, 20);
        assert_eq!(update.percent, 100);
        assert_eq!(update.message.as_deref(), Some("denoising"));
        assert_eq!(update.current_step, Some(3));
        assert_eq!(update.total_steps, Some(20));
    }
}
