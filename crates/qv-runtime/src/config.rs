//! # Runtime Configuration
//!
//! Aggregates the pipeline configuration with storage and remote settings.
//!
//! ## Environment
//!
//! | Variable | Default | Field |
//! |----------|---------|-------|
//! | `QV_DATA_DIR` | `./data/qv` | `storage.data_dir` |
//! | `QV_SYNC_WRITES` | `true` | `storage.sync_writes` |
//! | `QV_REMOTE_ENDPOINT` | `http://127.0.0.1:8080` | `remote.endpoint` |
//! | `QV_CONNECT_TIMEOUT_MS` | `2000` | `remote.connect_timeout_ms` |
//! | `QV_SUBMIT_TIMEOUT_MS` | `10000` | `service.submit_timeout_ms` |
//! | `QV_VALIDITY_WINDOW_SECS` | `300` | `service.validity_window_secs` |
//! | `QV_RETENTION_SECS` | 30 days | `service.retention_secs` |
//! | `QV_MAX_TRANSPORT_ATTEMPTS` | unset (retry forever) | `service.max_transport_attempts` |
//! | `QV_SYNC_INTERVAL_SECS` | `60` | `service.sync_interval_secs` |
//! | `QV_RETRY_ERRORS_ON_SCHEDULE` | `false` | `service.retry_errors_on_schedule` |
//!
//! Unparseable values are logged and ignored; the default stays in effect.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use qv_visit_verification::{ConfigError, VisitVerificationConfig};
use thiserror::Error;
use tracing::warn;

/// Runtime configuration errors.
#[derive(Debug, Error)]
pub enum RuntimeConfigError {
    #[error(transparent)]
    Service(#[from] ConfigError),

    #[error("Remote endpoint must be an http(s) URL, got {0:?}")]
    InvalidEndpoint(String),

    #[error("Data directory must not be empty")]
    EmptyDataDir,
}

/// Local storage settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    /// fsync every write; required for the durability guarantees
    pub sync_writes: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data/qv"),
            sync_writes: true,
        }
    }
}

/// Remote authority settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteConfig {
    /// Base URL; visits are posted to `{endpoint}/visits`
    pub endpoint: String,
    pub connect_timeout_ms: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8080".to_string(),
            connect_timeout_ms: 2_000,
        }
    }
}

impl RemoteConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Complete runtime configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RuntimeConfig {
    pub service: VisitVerificationConfig,
    pub storage: StorageConfig,
    pub remote: RemoteConfig,
}

impl RuntimeConfig {
    /// Build a config from `lookup`, starting from defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(dir) = lookup("QV_DATA_DIR") {
            config.storage.data_dir = PathBuf::from(dir);
        }
        override_parsed(&lookup, "QV_SYNC_WRITES", &mut config.storage.sync_writes);

        if let Some(endpoint) = lookup("QV_REMOTE_ENDPOINT") {
            config.remote.endpoint = endpoint.trim_end_matches('/').to_string();
        }
        override_parsed(
            &lookup,
            "QV_CONNECT_TIMEOUT_MS",
            &mut config.remote.connect_timeout_ms,
        );

        let service = &mut config.service;
        override_parsed(&lookup, "QV_SUBMIT_TIMEOUT_MS", &mut service.submit_timeout_ms);
        override_parsed(
            &lookup,
            "QV_VALIDITY_WINDOW_SECS",
            &mut service.validity_window_secs,
        );
        override_parsed(&lookup, "QV_RETENTION_SECS", &mut service.retention_secs);
        override_parsed(&lookup, "QV_SYNC_INTERVAL_SECS", &mut service.sync_interval_secs);
        override_parsed(
            &lookup,
            "QV_RETRY_ERRORS_ON_SCHEDULE",
            &mut service.retry_errors_on_schedule,
        );
        let mut attempts = 0u32;
        if override_parsed(&lookup, "QV_MAX_TRANSPORT_ATTEMPTS", &mut attempts) {
            service.max_transport_attempts = Some(attempts);
        }

        config
    }

    pub fn validate(&self) -> Result<(), RuntimeConfigError> {
        self.service.validate()?;
        if self.storage.data_dir.as_os_str().is_empty() {
            return Err(RuntimeConfigError::EmptyDataDir);
        }
        let endpoint = &self.remote.endpoint;
        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            return Err(RuntimeConfigError::InvalidEndpoint(endpoint.clone()));
        }
        Ok(())
    }
}

/// Load configuration from `QV_*` environment variables.
pub fn load_config() -> RuntimeConfig {
    RuntimeConfig::from_lookup(|key| std::env::var(key).ok())
}

/// Parse `key` into `target` if present. Returns whether it was applied.
fn override_parsed<F, T>(lookup: &F, key: &str, target: &mut T) -> bool
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    let Some(raw) = lookup(key) else {
        return false;
    };
    match raw.trim().parse() {
        Ok(value) => {
            *target = value;
            true
        }
        Err(_) => {
            warn!(key, value = %raw, "Ignoring unparseable configuration value");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = RuntimeConfig::from_lookup(lookup(&[]));
        assert_eq!(config, RuntimeConfig::default());
        assert_eq!(config.service.max_transport_attempts, None);
        assert!(config.storage.sync_writes);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_overrides() {
        let config = RuntimeConfig::from_lookup(lookup(&[
            ("QV_DATA_DIR", "/var/lib/qv"),
            ("QV_REMOTE_ENDPOINT", "https://visits.example.com/api/"),
            ("QV_MAX_TRANSPORT_ATTEMPTS", "5"),
            ("QV_SYNC_INTERVAL_SECS", "30"),
            ("QV_RETRY_ERRORS_ON_SCHEDULE", "true"),
            ("QV_SYNC_WRITES", "false"),
        ]));

        assert_eq!(config.storage.data_dir, PathBuf::from("/var/lib/qv"));
        assert!(!config.storage.sync_writes);
        assert_eq!(config.remote.endpoint, "https://visits.example.com/api");
        assert_eq!(config.service.max_transport_attempts, Some(5));
        assert_eq!(config.service.sync_interval_secs, 30);
        assert!(config.service.retry_errors_on_schedule);
    }

    #[test]
    fn test_unparseable_values_keep_defaults() {
        let config = RuntimeConfig::from_lookup(lookup(&[
            ("QV_SUBMIT_TIMEOUT_MS", "soon"),
            ("QV_MAX_TRANSPORT_ATTEMPTS", "-1"),
        ]));
        assert_eq!(
            config.service.submit_timeout_ms,
            VisitVerificationConfig::default().submit_timeout_ms
        );
        assert_eq!(config.service.max_transport_attempts, None);
    }

    #[test]
    fn test_validation() {
        let config = RuntimeConfig::from_lookup(lookup(&[("QV_REMOTE_ENDPOINT", "ftp://x")]));
        assert!(matches!(
            config.validate(),
            Err(RuntimeConfigError::InvalidEndpoint(_))
        ));

        let config = RuntimeConfig::from_lookup(lookup(&[("QV_RETENTION_SECS", "60")]));
        assert!(matches!(
            config.validate(),
            Err(RuntimeConfigError::Service(ConfigError::RetentionTooShort { .. }))
        ));
    }
}
