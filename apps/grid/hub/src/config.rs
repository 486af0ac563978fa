//! Hub configuration from environment variables.

use core_config::{ConfigError, FromEnv, env_parse_or};
use core_config::server::ServerConfig;
use domain_jobs::QueueConfig;

#[derive(Debug, Clone)]
pub struct HubConfig {
    pub server: ServerConfig,
    /// Token monitors must present on WebSocket upgrade. Unset means
    /// open access (development).
    pub monitor_auth_token: Option<String>,

    /// Event ring capacity for monitor replay.
    pub ring_capacity: usize,
    /// Cap on events returned by one resync.
    pub resync_max_events: usize,
    /// Outbound queue per monitor; a full queue drops the monitor.
    pub monitor_queue_capacity: usize,
    pub monitor_sweep_interval_secs: u64,
    pub monitor_stale_threshold_secs: u64,

    pub janitor_interval_secs: u64,
    pub stats_interval_secs: u64,

    pub queue: QueueConfig,
}

impl FromEnv for HubConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let queue = QueueConfig::default()
            .with_default_priority(env_parse_or("HUB_DEFAULT_PRIORITY", 50)?)
            .with_default_max_retries(env_parse_or("HUB_DEFAULT_MAX_RETRIES", 3)?)
            .with_attestation_ttl_secs(env_parse_or("HUB_ATTESTATION_TTL_SECS", 604_800)?)
            .with_progress_throttle_ms(env_parse_or("HUB_PROGRESS_THROTTLE_MS", 100)?)
            .with_stale_warning_secs(env_parse_or("HUB_STALE_WARNING_SECS", 30)?)
            .with_stale_threshold_secs(env_parse_or("HUB_STALE_THRESHOLD_SECS", 60)?);

        Ok(Self {
            server: ServerConfig::from_env()?,
            monitor_auth_token: std::env::var("MONITOR_AUTH_TOKEN").ok(),
            ring_capacity: env_parse_or("HUB_EVENT_RING_CAPACITY", 1_000)?,
            resync_max_events: env_parse_or("HUB_RESYNC_MAX_EVENTS", 500)?,
            monitor_queue_capacity: env_parse_or("HUB_MONITOR_QUEUE_CAPACITY", 256)?,
            monitor_sweep_interval_secs: env_parse_or("HUB_MONITOR_SWEEP_INTERVAL_SECS", 30)?,
            monitor_stale_threshold_secs: env_parse_or("HUB_MONITOR_STALE_THRESHOLD_SECS", 60)?,
            janitor_interval_secs: env_parse_or("HUB_JANITOR_INTERVAL_SECS", 15)?,
            stats_interval_secs: env_parse_or("HUB_STATS_INTERVAL_SECS", 10)?,
            queue,
        })
    }
}
