use std::path::Path;
use std::time::Duration;
use serde::{Deserialize, Serialize};
use crate::upload::{Result, UploadError, MAX_FILE_SIZE};
use crate::utils::{serde_millis, RetryStrategy};

pub const DEFAULT_CONFIG_FILE: &str = "config.toml";

#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    pub api: ApiConfig,
    pub upload: UploadConfig,
    /// `tracing` filter directive, `RUST_LOG` wins when set
    pub log_level: Option<String>,
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Config> {
        let path = path.as_ref();
        let config_str = std::fs::read_to_string(path)
            .map_err(|err| UploadError::Config(format!("cannot read {}: {}", path.display(), err)))?;
        Self::parse(&config_str)
    }

    pub fn parse(config_str: &str) -> Result<Config> {
        toml::from_str(config_str).map_err(|err| UploadError::Config(err.to_string()))
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    pub timeout_secs: u64,
    pub token: Option<String>,
    pub tenant_id: Option<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000/api".to_string(),
            timeout_secs: 30,
            token: None,
            tenant_id: None,
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct UploadConfig {
    /// Largest accepted file in bytes
    pub max_file_size: u64,

    /// How long a succeeded task stays visible
    #[serde(with = "serde_millis")]
    pub retention: Duration,

    /// Simultaneous uploads, 0 = unbounded
    pub max_concurrent: usize,

    pub max_retries: u32,

    pub retry_backoff: RetryStrategy,

    /// Broadcast buffer for `UploadEvent`s
    pub event_capacity: usize,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_file_size: MAX_FILE_SIZE,
            retention: Duration::from_millis(3000),
            max_concurrent: 3,
            max_retries: 3,
            retry_backoff: RetryStrategy::default(),
            event_capacity: 256,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.upload.max_file_size, 10 * 1024 * 1024);
        assert_eq!(config.upload.retention, Duration::from_millis(3000));
    }

    #[test]
    fn test_partial_override() {
        let config = Config::parse(
            r#"
            log_level = "debug"

            [api]
            base_url = "https://api.example.test/api"
            token = "secret"

            [upload]
            retention = 500
            max_concurrent = 0

            [upload.retry_backoff]
            kind = "fixed"
            delay = 250
            "#,
        )
        .unwrap();

        assert_eq!(config.api.base_url, "https://api.example.test/api");
        assert_eq!(config.api.timeout_secs, 30);
        assert_eq!(config.upload.retention, Duration::from_millis(500));
        assert_eq!(config.upload.max_concurrent, 0);
        assert_eq!(config.upload.max_retries, 3);
        assert_eq!(config.upload.retry_backoff, RetryStrategy::Fixed { delay: Duration::from_millis(250) });
    }

    #[test]
    fn test_invalid_config() {
        assert!(matches!(Config::parse("[upload]\nretention = \"soon\""), Err(UploadError::Config(_))));
        assert!(matches!(Config::load("/definitely/missing.toml"), Err(UploadError::Config(_))));
    }
}
