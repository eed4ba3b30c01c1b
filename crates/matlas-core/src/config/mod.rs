//! Configuration for the matlas CLI and apply engine.
//!
//! Configuration is a single YAML file, looked up in order:
//!
//! 1. the path given with `--config`,
//! 2. `$MATLAS_CONFIG`,
//! 3. `~/.config/matlas/config.yaml` when it exists.
//!
//! Every section is optional; a missing file yields the defaults.

pub mod duration;
pub mod execution;

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub use execution::{DiscoveryConfig, ExecutionConfig, RetryConfig, TempUsersConfig, MAX_PAGE_SIZE};

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "MATLAS_CONFIG";

/// Complete matlas configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatlasConfig {
    /// Default Atlas project id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,

    #[serde(default)]
    pub execution: ExecutionConfig,

    #[serde(default)]
    pub discovery: DiscoveryConfig,

    #[serde(default)]
    pub temp_users: TempUsersConfig,

    #[serde(default)]
    pub backend: BackendConfig,
}

/// Where the services come from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendConfig {
    /// JSON snapshot backing the in-memory Atlas sandbox.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_file: Option<PathBuf>,
}

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ConfigError {
    pub fn code(&self) -> &'static str {
        match self {
            ConfigError::Io { .. } => "MATLAS-CONFIG-001",
            ConfigError::Yaml(_) => "MATLAS-CONFIG-002",
            ConfigError::Config(_) => "MATLAS-CONFIG-003",
        }
    }
}

impl MatlasConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML content.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_yaml::from_str(content)?;
        config.check()?;
        Ok(config)
    }

    /// Resolve the config file location and load it.
    ///
    /// An explicit path must exist; the fallback locations are optional.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        if let Some(path) = std::env::var_os(CONFIG_ENV).filter(|v| !v.is_empty()) {
            return Self::from_file(PathBuf::from(path));
        }
        match default_config_path() {
            Some(path) if path.is_file() => Self::from_file(path),
            _ => Ok(Self::default()),
        }
    }

    fn check(&self) -> Result<(), ConfigError> {
        if self.execution.max_concurrent_operations == 0 {
            return Err(ConfigError::Config(
                "execution.maxConcurrentOperations must be at least 1".into(),
            ));
        }
        if self.execution.retry.max_attempts == 0 {
            return Err(ConfigError::Config(
                "execution.retry.maxAttempts must be at least 1".into(),
            ));
        }
        if self.discovery.concurrency == 0 {
            return Err(ConfigError::Config(
                "discovery.concurrency must be at least 1".into(),
            ));
        }
        if self.temp_users.ttl.is_zero() {
            return Err(ConfigError::Config("tempUsers.ttl must be positive".into()));
        }
        Ok(())
    }
}

/// `matlas/config.yaml` under the platform config directory
/// (`~/.config` on Linux).
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("matlas").join("config.yaml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kind::ResourceKind;
    use std::time::Duration;

    #[test]
    fn test_default_path_is_under_config_dir() {
        if let Some(path) = default_config_path() {
            assert!(path.ends_with("matlas/config.yaml"), "{}", path.display());
            assert_eq!(path.parent().and_then(|p| p.parent()), dirs::config_dir().as_deref());
        }
    }

    #[test]
    fn test_defaults() {
        let config = MatlasConfig::default();
        assert_eq!(config.execution.max_concurrent_operations, 5);
        assert_eq!(config.execution.call_timeout, Duration::from_secs(30));
        assert_eq!(config.execution.retry.max_attempts, 3);
        assert_eq!(config.discovery.concurrency, 8);
        assert_eq!(config.temp_users.auth_database, "admin");
    }

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
projectId: 5f1a2b3c4d5e6f7a8b9c0d1e
execution:
  maxConcurrentOperations: 2
  operationTimeout: 90s
  kindTimeouts:
    Cluster: 1h
  retry:
    baseDelay: 250ms
discovery:
  pageSize: 100
tempUsers:
  ttl: 30m
backend:
  stateFile: /tmp/atlas.json
"#;
        let config = MatlasConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.project_id.as_deref(), Some("5f1a2b3c4d5e6f7a8b9c0d1e"));
        assert_eq!(config.execution.max_concurrent_operations, 2);
        assert_eq!(config.execution.operation_timeout, Duration::from_secs(90));
        assert_eq!(
            config.execution.operation_timeout_for(ResourceKind::Cluster),
            Duration::from_secs(3600)
        );
        assert_eq!(config.execution.retry.base_delay, Duration::from_millis(250));
        assert_eq!(config.execution.retry.max_attempts, 3);
        assert_eq!(config.discovery.page_size, 100);
        assert_eq!(config.temp_users.ttl, Duration::from_secs(1800));
        assert_eq!(
            config.backend.state_file,
            Some(PathBuf::from("/tmp/atlas.json"))
        );
    }

    #[test]
    fn test_empty_file_is_default() {
        assert_eq!(MatlasConfig::from_yaml("  \n").unwrap(), MatlasConfig::default());
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let err = MatlasConfig::from_yaml("execution:\n  maxConcurrentOperations: 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Config(_)));
    }

    #[test]
    fn test_bad_duration_rejected() {
        assert!(MatlasConfig::from_yaml("execution:\n  callTimeout: forever\n").is_err());
    }

    #[test]
    fn test_explicit_missing_file_errors() {
        let err = MatlasConfig::load(Some(Path::new("/nonexistent/matlas.yaml"))).unwrap_err();
        assert_eq!(err.code(), "MATLAS-CONFIG-001");
    }
}
