//! Configuration loading for the sync client.
//!
//! All fields are required unless explicitly marked optional. No defaults.

use consult_cache::{CacheConfig, RestConfig};
use consult_realtime::ReconnectConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_ENV_VAR: &str = "CONSULT_SYNC_CONFIG";

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SyncConfig {
    pub api_base_url: String,
    pub ws_endpoint: String,
    pub request_timeout_ms: u64,
    pub session_path: PathBuf,
    pub auth: AuthConfig,
    pub cache: CacheTtlConfig,
    pub prefetch: PrefetchConfig,
    pub reconnect: ReconnectConfig,
    pub log: LogConfig,
    /// Topics the CLI tails and logs.
    #[serde(default)]
    pub topics: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthConfig {
    pub bearer_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheTtlConfig {
    pub request_ttl_ms: u64,
    pub query_ttl_ms: u64,
    pub prefetch_ttl_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PrefetchConfig {
    pub enabled: bool,
    pub delay_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LogConfig {
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing configuration file path (use --config or CONSULT_SYNC_CONFIG)")]
    MissingConfigPath,
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid config value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

impl SyncConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let path = config_path_from_args().or_else(config_path_from_env);
        let path = path.ok_or(ConfigError::MissingConfigPath)?;
        let config = Self::from_path(&path)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let config: SyncConfig = toml::from_str(contents)?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_base_url.trim().is_empty() {
            return Err(invalid("api_base_url", "must not be empty"));
        }
        if !self.api_base_url.starts_with("http://") && !self.api_base_url.starts_with("https://")
        {
            return Err(invalid("api_base_url", "must start with http:// or https://"));
        }
        if self.ws_endpoint.trim().is_empty() {
            return Err(invalid("ws_endpoint", "must not be empty"));
        }
        if !self.ws_endpoint.starts_with("ws://") && !self.ws_endpoint.starts_with("wss://") {
            return Err(invalid("ws_endpoint", "must start with ws:// or wss://"));
        }
        if self.request_timeout_ms == 0 {
            return Err(invalid("request_timeout_ms", "must be > 0"));
        }
        if self.session_path.as_os_str().is_empty() {
            return Err(invalid("session_path", "must not be empty"));
        }
        if let Some(token) = &self.auth.bearer_token {
            if token.trim().is_empty() {
                return Err(invalid("auth.bearer_token", "must not be blank when set"));
            }
        }
        if self.cache.request_ttl_ms == 0 {
            return Err(invalid("cache.request_ttl_ms", "must be > 0"));
        }
        if self.cache.query_ttl_ms == 0 {
            return Err(invalid("cache.query_ttl_ms", "must be > 0"));
        }
        if self.cache.prefetch_ttl_ms == 0 {
            return Err(invalid("cache.prefetch_ttl_ms", "must be > 0"));
        }
        if self.reconnect.initial_ms == 0 {
            return Err(invalid("reconnect.initial_ms", "must be > 0"));
        }
        if self.reconnect.max_ms < self.reconnect.initial_ms {
            return Err(invalid("reconnect.max_ms", "must be >= initial_ms"));
        }
        if self.reconnect.multiplier < 1.0 {
            return Err(invalid("reconnect.multiplier", "must be >= 1.0"));
        }
        if self.topics.iter().any(|topic| topic.trim().is_empty()) {
            return Err(invalid("topics", "must not contain empty topic names"));
        }
        Ok(())
    }

    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig::new()
            .with_request_ttl(Duration::from_millis(self.cache.request_ttl_ms))
            .with_query_ttl(Duration::from_millis(self.cache.query_ttl_ms))
            .with_prefetch_ttl(Duration::from_millis(self.cache.prefetch_ttl_ms))
    }

    pub fn rest_config(&self) -> RestConfig {
        RestConfig {
            base_url: self.api_base_url.clone(),
            timeout: Duration::from_millis(self.request_timeout_ms),
            bearer_token: self.auth.bearer_token.clone(),
        }
    }

    pub fn prefetch_delay(&self) -> Duration {
        Duration::from_millis(self.prefetch.delay_ms)
    }
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field,
        reason: reason.to_string(),
    }
}

fn config_path_from_env() -> Option<PathBuf> {
    std::env::var(CONFIG_ENV_VAR).ok().map(PathBuf::from)
}

fn config_path_from_args() -> Option<PathBuf> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args.next().map(PathBuf::from);
        }
    }
    None
}
