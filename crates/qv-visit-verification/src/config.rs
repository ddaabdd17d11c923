//! # Visit Verification Configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{DEFAULT_RETENTION_SECS, VALIDITY_WINDOW_SECS};

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// Purging records still inside the validity window would let a
    /// consumed token read as unknown while it is still scannable.
    #[error("Retention ({retention_secs}s) must exceed the validity window ({validity_secs}s)")]
    RetentionTooShort {
        retention_secs: u64,
        validity_secs: u64,
    },

    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },
}

/// Tunables of the pipeline.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisitVerificationConfig {
    /// Inclusive token validity window in seconds.
    pub validity_window_secs: u64,

    /// How long settled replay records are kept before purging.
    pub retention_secs: u64,

    /// Transport failures after which a PENDING visit moves to ERROR.
    /// `None` keeps it PENDING until it succeeds or is purged.
    pub max_transport_attempts: Option<u32>,

    /// Per-submission timeout; expiry counts as a transport failure.
    pub submit_timeout_ms: u64,

    /// Interval between scheduled drain passes.
    pub sync_interval_secs: u64,

    /// Re-enqueue ERROR visits before every scheduled pass.
    pub retry_errors_on_schedule: bool,
}

impl Default for VisitVerificationConfig {
    fn default() -> Self {
        Self {
            validity_window_secs: VALIDITY_WINDOW_SECS,
            retention_secs: DEFAULT_RETENTION_SECS,
            max_transport_attempts: None,
            submit_timeout_ms: 10_000,
            sync_interval_secs: 60,
            retry_errors_on_schedule: false,
        }
    }
}

impl VisitVerificationConfig {
    /// Create a config for testing (short timeouts and intervals).
    pub fn for_testing() -> Self {
        Self {
            submit_timeout_ms: 200,
            sync_interval_secs: 1,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.validity_window_secs == 0 {
            return Err(ConfigError::Zero {
                field: "validity_window_secs",
            });
        }
        if self.submit_timeout_ms == 0 {
            return Err(ConfigError::Zero {
                field: "submit_timeout_ms",
            });
        }
        if self.sync_interval_secs == 0 {
            return Err(ConfigError::Zero {
                field: "sync_interval_secs",
            });
        }
        if self.max_transport_attempts == Some(0) {
            return Err(ConfigError::Zero {
                field: "max_transport_attempts",
            });
        }
        if self.retention_secs <= self.validity_window_secs {
            return Err(ConfigError::RetentionTooShort {
                retention_secs: self.retention_secs,
                validity_secs: self.validity_window_secs,
            });
        }
        Ok(())
    }

    pub fn submit_timeout(&self) -> Duration {
        Duration::from_millis(self.submit_timeout_ms)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }
}
