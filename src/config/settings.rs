//! Queue tuning loaded from TOML.
//!
//! Every field has a default, so an empty file (or no file) is valid.
//!
//! ```toml
//! default_max_retries = 5
//! stuck_timeout_secs = 600
//!
//! [retry]
//! base_delay_ms = 500
//! strategy = "linear"
//! ```

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::engine::{MaintenanceConfig, WorkerConfig};
use crate::error::{Error, Result};
use crate::model::{DEFAULT_MAX_RETRIES, MAX_ERROR_LENGTH};
use crate::retry::{BackoffStrategy, RetryPolicy};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QueueSettings {
    /// Error messages longer than this many characters are truncated.
    pub max_error_length: usize,
    /// Applied when a producer does not set `max_retries`.
    pub default_max_retries: u32,
    /// Processing leases older than this are reclaimed by the reaper.
    pub stuck_timeout_secs: u64,
    /// Completed messages older than this are deleted by the sweeper.
    pub retention_days: u64,
    pub maintenance_interval_secs: u64,
    /// Worker sleep when a claim comes back empty.
    pub poll_interval_ms: u64,
    pub batch_size: u32,
    pub max_connections: u32,
    pub retry: RetrySettings,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            max_error_length: MAX_ERROR_LENGTH,
            default_max_retries: DEFAULT_MAX_RETRIES,
            stuck_timeout_secs: 300,
            retention_days: 7,
            maintenance_interval_secs: 60,
            poll_interval_ms: 1000,
            batch_size: 10,
            max_connections: crate::db::DEFAULT_MAX_CONNECTIONS,
            retry: RetrySettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetrySettings {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub strategy: BackoffStrategy,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            base_delay_ms: 1000,
            max_delay_ms: 300_000,
            strategy: BackoffStrategy::Exponential,
        }
    }
}

impl QueueSettings {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let settings: Self =
            toml::from_str(content).map_err(|e| Error::Config(format!("bad settings: {e}")))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))
    }

    fn validate(&self) -> Result<()> {
        if self.max_error_length == 0 {
            return Err(Error::Config("max_error_length must be positive".into()));
        }
        if self.batch_size == 0 {
            return Err(Error::Config("batch_size must be positive".into()));
        }
        if self.retry.max_delay_ms < self.retry.base_delay_ms {
            return Err(Error::Config(
                "retry.max_delay_ms must not be below retry.base_delay_ms".into(),
            ));
        }
        Ok(())
    }

    pub fn stuck_timeout(&self) -> Duration {
        Duration::from_secs(self.stuck_timeout_secs)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_days.saturating_mul(24 * 60 * 60))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_millis(self.retry.base_delay_ms),
            max_delay: Duration::from_millis(self.retry.max_delay_ms),
            strategy: self.retry.strategy,
        }
    }

    pub fn worker_config(&self, queue_name: impl Into<String>) -> WorkerConfig {
        WorkerConfig {
            queue_name: queue_name.into(),
            batch_size: self.batch_size,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            retry: self.retry_policy(),
        }
    }

    pub fn maintenance_config(&self) -> MaintenanceConfig {
        MaintenanceConfig {
            stuck_timeout: self.stuck_timeout(),
            retention: self.retention(),
            interval: Duration::from_secs(self.maintenance_interval_secs),
        }
    }
}
