//! Configuration types for poolet

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::PooletResult;

/// Environment variable prefix, e.g. `POOLET__API__PORT=9300`
pub const ENV_PREFIX: &str = "POOLET";

/// Main daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct DaemonConfig {
    /// API server configuration
    pub api: ApiConfig,
    /// Scheduler configuration
    pub scheduler: SchedulerConfig,
    /// State store configuration
    pub store: StoreConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

impl DaemonConfig {
    /// Load configuration by layering defaults, an optional TOML file and
    /// `POOLET__*` environment variables, in that order.
    pub fn load(path: Option<&Path>) -> PooletResult<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).format(config::FileFormat::Toml));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );

        let config: DaemonConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string
    pub fn from_toml(content: &str) -> PooletResult<Self> {
        let config: DaemonConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> PooletResult<()> {
        if self.scheduler.expiry_interval_ms == 0 {
            return Err(crate::PooletError::Config(
                "scheduler.expiry_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.store.watch_buffer == 0 {
            return Err(crate::PooletError::Config(
                "store.watch_buffer must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// API server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Address to bind the REST API server
    pub address: String,
    /// Port for the REST API server
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            address: "0.0.0.0".to_string(),
            port: 9300,
        }
    }
}

/// Kind of instance a scheduler places
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    #[default]
    Volume,
    Bucket,
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceKind::Volume => write!(f, "volume"),
            ResourceKind::Bucket => write!(f, "bucket"),
        }
    }
}

/// Scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// What this scheduler places (used in logs and diagnostics)
    pub resource_kind: ResourceKind,
    /// Period of the assumed-instance expiry sweep
    pub expiry_interval_ms: u64,
    /// Grace after a commit concludes before the sweep may drop the assumption
    pub assume_ttl_secs: u64,
    /// Upper bound on one commit patch against the store
    pub bind_timeout_secs: u64,
    /// Period of the full re-enqueue of unassigned instances (0 disables)
    pub resync_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            resource_kind: ResourceKind::Volume,
            expiry_interval_ms: 1000,
            assume_ttl_secs: 30,
            bind_timeout_secs: 30,
            resync_interval_secs: 60,
        }
    }
}

impl SchedulerConfig {
    pub fn expiry_interval(&self) -> Duration {
        Duration::from_millis(self.expiry_interval_ms)
    }

    pub fn assume_ttl(&self) -> Duration {
        Duration::from_secs(self.assume_ttl_secs)
    }

    pub fn bind_timeout(&self) -> Duration {
        Duration::from_secs(self.bind_timeout_secs)
    }

    pub fn resync_interval(&self) -> Option<Duration> {
        (self.resync_interval_secs > 0).then(|| Duration::from_secs(self.resync_interval_secs))
    }
}

/// In-memory state store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Capacity of the watch broadcast buffer
    pub watch_buffer: usize,
    /// Manifest of containers and instances to seed the store with
    pub manifest: Option<PathBuf>,
    /// Number of diagnostics retained for the API
    pub event_history: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            watch_buffer: 1024,
            manifest: None,
            event_history: 512,
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level or `EnvFilter` directive
    pub level: String,
    /// Log format
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_daemon_config() {
        let config = DaemonConfig::default();
        assert_eq!(config.api.port, 9300);
        assert_eq!(config.scheduler.expiry_interval(), Duration::from_secs(1));
        assert_eq!(config.scheduler.resync_interval(), Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = DaemonConfig::from_toml(
            r#"
[scheduler]
resource_kind = "bucket"
assume_ttl_secs = 5
resync_interval_secs = 0

[logging]
format = "json"
"#,
        )
        .unwrap();
        assert_eq!(config.scheduler.resource_kind, ResourceKind::Bucket);
        assert_eq!(config.scheduler.assume_ttl(), Duration::from_secs(5));
        assert_eq!(config.scheduler.resync_interval(), None);
        assert_eq!(config.scheduler.bind_timeout_secs, 30);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.api.port, 9300);
    }

    #[test]
    fn test_zero_expiry_interval_rejected() {
        let result = DaemonConfig::from_toml("[scheduler]\nexpiry_interval_ms = 0\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_load_without_file_uses_defaults() {
        let config = DaemonConfig::load(None).unwrap();
        assert_eq!(config.store.watch_buffer, 1024);
    }
}
