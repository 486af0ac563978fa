//! Data-plane configuration.

/// Tunables for the queue, matcher and audit layers.
///
/// Defaults match production behavior; tests and operators override
/// individual fields with the builder methods.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// How many pending candidates one matcher call inspects.
    pub max_scan: usize,

    /// Default effective priority when neither the job nor its workflow
    /// carries one.
    pub default_priority: i64,

    /// Default retry budget for submissions that do not set one.
    pub default_max_retries: u32,

    /// TTL for attestation keys (they expire, they are never rewritten).
    pub attestation_ttl_secs: u64,

    /// Minimum gap between progress events for one job (~10 Hz default).
    pub progress_throttle_ms: u64,

    /// Approximate cap on each progress stream (XADD MAXLEN ~).
    pub progress_stream_max_len: i64,

    /// Heartbeat age at which the janitor marks a worker offline and
    /// requeues its jobs.
    pub stale_threshold_secs: u64,

    /// Heartbeat age at which the janitor starts warning about a worker.
    pub stale_warning_secs: u64,

    /// TTL for cancellation marker keys.
    pub cancel_marker_ttl_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_scan: 50,
            default_priority: 50,
            default_max_retries: 3,
            attestation_ttl_secs: 7 * 24 * 60 * 60,
            progress_throttle_ms: 100,
            progress_stream_max_len: 1_000,
            stale_threshold_secs: 60,
            stale_warning_secs: 30,
            cancel_marker_ttl_secs: 3_600,
        }
    }
}

impl QueueConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_scan(mut self, max_scan: usize) -> Self {
        self.max_scan = max_scan.max(1);
        self
    }

    pub fn with_default_priority(mut self, priority: i64) -> Self {
        self.default_priority = priority;
        self
    }

    pub fn with_default_max_retries(mut self, retries: u32) -> Self {
        self.default_max_retries = retries;
        self
    }

    pub fn with_attestation_ttl_secs(mut self, ttl: u64) -> Self {
        self.attestation_ttl_secs = ttl;
        self
    }

    pub fn with_progress_throttle_ms(mut self, ms: u64) -> Self {
        self.progress_throttle_ms = ms;
        self
    }

    pub fn with_stale_threshold_secs(mut self, secs: u64) -> Self {
        self.stale_threshold_secs = secs;
        self
    }

    pub fn with_stale_warning_secs(mut self, secs: u64) -> Self {
        self.stale_warning_secs = secs;
        self
    }
}
