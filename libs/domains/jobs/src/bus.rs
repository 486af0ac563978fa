//! Cross-process event bus.
//!
//! Workers and the hub publish lifecycle events to one Redis stream
//! (`events:lifecycle`); the hub tails it and fans out to monitors and
//! webhooks. A single stream keeps per-job event order intact across
//! processes. The stream is capped - it is a transport, not the audit
//! layer (attestations are).

use crate::error::JobError;
use crate::events::EventEnvelope;
use redis::aio::ConnectionManager;
use tracing::{debug, warn};

/// Stream key carrying all lifecycle events.
pub const EVENTS_STREAM: &str = "events:lifecycle";

/// Approximate cap on retained entries (XADD MAXLEN ~).
const EVENTS_MAX_LEN: i64 = 10_000;

/// Publisher/consumer handle for the lifecycle stream.
#[derive(Clone)]
pub struct EventBus {
    redis: ConnectionManager,
}

impl EventBus {
    pub fn new(redis: ConnectionManager) -> Self {
        Self { redis }
    }

    /// Append an event. Returns the stream entry id.
    pub async fn publish(&self, envelope: &EventEnvelope) -> Result<String, JobError> {
        let mut conn = self.redis.clone();
        let payload = serde_json::to_string(envelope)?;

        let entry_id: String = redis::cmd("XADD")
            .arg(EVENTS_STREAM)
            .arg("MAXLEN")
            .arg("~")
            .arg(EVENTS_MAX_LEN)
            .arg("*")
            .arg("event")
            .arg(&payload)
            .query_async(&mut conn)
            .await?;

        debug!(
            entry_id = %entry_id,
            event_type = %envelope.event.event_type(),
            "Event published"
        );
        Ok(entry_id)
    }

    /// Blocking tail read after `last_id` (use `"$"` to start at the
    /// stream head). Returns (entry id, envelope) pairs in stream order;
    /// an empty vec on block timeout. Undecodable entries are skipped.
    pub async fn read_after(
        &self,
        last_id: &str,
        block_ms: u64,
        count: usize,
    ) -> Result<Vec<(String, EventEnvelope)>, JobError> {
        let mut conn = self.redis.clone();

        let reply: Option<redis::streams::StreamReadReply> = redis::cmd("XREAD")
            .arg("COUNT")
            .arg(count)
            .arg("BLOCK")
            .arg(block_ms)
            .arg("STREAMS")
            .arg(EVENTS_STREAM)
            .arg(last_id)
            .query_async(&mut conn)
            .await?;

        let Some(reply) = reply else {
            return Ok(Vec::new());
        };

        let mut events = Vec::new();
        for stream_key in reply.keys {
            for entry in stream_key.ids {
                let raw = match entry.map.get("event") {
                    Some(redis::Value::BulkString(bytes)) => {
                        String::from_utf8_lossy(bytes).to_string()
                    }
                    Some(redis::Value::SimpleString(s)) => s.clone(),
                    _ => {
                        warn!(entry_id = %entry.id, "Event entry missing 'event' field");
                        continue;
                    }
                };
                match serde_json::from_str::<EventEnvelope>(&raw) {
                    Ok(envelope) => events.push((entry.id.clone(), envelope)),
                    Err(e) => {
                        warn!(entry_id = %entry.id, error = %e, "Skipping undecodable event")
                    }
                }
            }
        }
        Ok(events)
    }
}
