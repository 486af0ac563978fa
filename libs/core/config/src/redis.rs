use crate::{ConfigError, FromEnv};

/// Redis connection configuration.
///
/// Redis is the sole cross-process store; every binary in the workspace
/// loads this at startup and fails fast if no URL is configured.
#[derive(Clone, Debug)]
pub struct RedisConfig {
    pub url: String,
}

impl RedisConfig {
    pub fn new(url: String) -> Self {
        Self { url }
    }
}

impl FromEnv for RedisConfig {
    /// Reads `REDIS_URL`, falling back to `HUB_REDIS_URL`. One of the two
    /// must be set (no default).
    fn from_env() -> Result<Self, ConfigError> {
        let url = std::env::var("REDIS_URL")
            .or_else(|_| std::env::var("HUB_REDIS_URL"))
            .map_err(|_| ConfigError::MissingEnvVar("REDIS_URL".to_string()))?;

        Ok(Self { url })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redis_config_from_env_success() {
        temp_env::with_vars(
            [
                ("REDIS_URL", Some("redis://localhost:6379")),
                ("HUB_REDIS_URL", None),
            ],
            || {
                let config = RedisConfig::from_env().unwrap();
                assert_eq!(config.url, "redis://localhost:6379");
            },
        );
    }

    #[test]
    fn test_redis_config_hub_url_fallback() {
        temp_env::with_vars(
            [
                ("REDIS_URL", None),
                ("HUB_REDIS_URL", Some("redis://hub:6379")),
            ],
            || {
                let config = RedisConfig::from_env().unwrap();
                assert_eq!(config.url, "redis://hub:6379");
            },
        );
    }

    #[test]
    fn test_redis_config_prefers_redis_url() {
        temp_env::with_vars(
            [
                ("REDIS_URL", Some("redis://primary:6379")),
                ("HUB_REDIS_URL", Some("redis://hub:6379")),
            ],
            || {
                let config = RedisConfig::from_env().unwrap();
                assert_eq!(config.url, "redis://primary:6379");
            },
        );
    }

    #[test]
    fn test_redis_config_from_env_missing() {
        temp_env::with_vars(
            [("REDIS_URL", None::<&str>), ("HUB_REDIS_URL", None::<&str>)],
            || {
                let config = RedisConfig::from_env();
                assert!(config.is_err());
                let err = config.unwrap_err();
                assert!(err.to_string().contains("REDIS_URL"));
                assert!(err.to_string().contains("required"));
            },
        );
    }

    #[test]
    fn test_redis_config_new() {
        let config = RedisConfig::new("redis://prod-host:6379".to_string());
        assert_eq!(config.url, "redis://prod-host:6379");
    }
}
