//! Configuration surface, deserializable from TOML.
//!
//! Values are read once at construction; the queue never reloads them.

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::StrandError;
use crate::queue::RedeliveryPosition;

/// Upper bound on the visibility timeout (12 hours).
pub const MAX_VISIBILITY_TIMEOUT_SECS: u64 = 43_200;

/// Deployment environment. Each one has a preset configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Dev,
    Staging,
    Prod,
}

impl Environment {
    pub fn as_str(self) -> &'static str {
        match self {
            Environment::Dev => "dev",
            Environment::Staging => "staging",
            Environment::Prod => "prod",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = StrandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dev" => Ok(Environment::Dev),
            "staging" => Ok(Environment::Staging),
            "prod" => Ok(Environment::Prod),
            other => Err(StrandError::InvalidConfig(format!(
                "unknown environment {other:?} (expected dev, staging or prod)"
            ))),
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrandConfig {
    pub environment: Environment,
    pub queue: QueueConfig,
    pub worker: WorkerConfig,
}

/// Queue tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// How long a lease lasts before the message is presumed abandoned.
    pub visibility_timeout_secs: u64,
    /// Leases granted before a failing message is dead-lettered.
    pub max_receive_count: u32,
    pub dedup_retention_secs: u64,
    /// Upper bound on one `lease` call, whatever the caller asks for.
    pub max_lease_batch_size: usize,
    /// Period of the reaper loop. Bounds how late an expired lease is noticed.
    pub sweep_interval_ms: u64,
    pub dead_letter_retention_days: u32,
    pub redelivery_position: RedeliveryPosition,
}

/// Worker pool settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub concurrency: usize,
    pub batch_size: usize,
    /// Idle workers re-poll at least this often, even without a wake-up.
    pub poll_interval_ms: u64,
    /// When set, a running handler's lease is extended by one heartbeat
    /// interval at this period. Must be shorter than the visibility timeout.
    pub heartbeat_interval_ms: Option<u64>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            visibility_timeout_secs: 180,
            max_receive_count: 5,
            dedup_retention_secs: 300,
            max_lease_batch_size: 10,
            sweep_interval_ms: 1_000,
            dead_letter_retention_days: 14,
            redelivery_position: RedeliveryPosition::Head,
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            batch_size: 1,
            poll_interval_ms: 500,
            heartbeat_interval_ms: None,
        }
    }
}

impl QueueConfig {
    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_secs)
    }

    pub fn dedup_retention(&self) -> Duration {
        Duration::from_secs(self.dedup_retention_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn dead_letter_retention(&self) -> Duration {
        Duration::from_secs(u64::from(self.dead_letter_retention_days) * 24 * 60 * 60)
    }

    pub fn validate(&self) -> Result<(), StrandError> {
        if self.visibility_timeout_secs == 0 {
            return Err(invalid("queue.visibility_timeout_secs must be > 0"));
        }
        if self.visibility_timeout_secs > MAX_VISIBILITY_TIMEOUT_SECS {
            return Err(invalid("queue.visibility_timeout_secs must be <= 43200"));
        }
        if self.max_receive_count == 0 {
            return Err(invalid("queue.max_receive_count must be > 0"));
        }
        if self.max_lease_batch_size == 0 {
            return Err(invalid("queue.max_lease_batch_size must be > 0"));
        }
        if self.sweep_interval_ms == 0 {
            return Err(invalid("queue.sweep_interval_ms must be > 0"));
        }
        Ok(())
    }
}

impl WorkerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn heartbeat_interval(&self) -> Option<Duration> {
        self.heartbeat_interval_ms.map(Duration::from_millis)
    }

    pub fn validate(&self) -> Result<(), StrandError> {
        if self.concurrency == 0 {
            return Err(invalid("worker.concurrency must be > 0"));
        }
        if self.batch_size == 0 {
            return Err(invalid("worker.batch_size must be > 0"));
        }
        if self.heartbeat_interval_ms == Some(0) {
            return Err(invalid("worker.heartbeat_interval_ms must be > 0 when set"));
        }
        Ok(())
    }
}

impl StrandConfig {
    /// Preset for an environment. All three currently share the same queue
    /// tuning; they differ only in name.
    pub fn for_environment(environment: Environment) -> Self {
        Self {
            environment,
            ..Self::default()
        }
    }

    pub fn from_toml_str(s: &str) -> Result<Self, StrandError> {
        let config: StrandConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, StrandError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| StrandError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&contents)?;
        tracing::info!(
            path = %path.display(),
            environment = %config.environment,
            "loaded configuration"
        );
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), StrandError> {
        self.queue.validate()?;
        self.worker.validate()?;
        match self.worker.heartbeat_interval() {
            Some(heartbeat) if heartbeat >= self.queue.visibility_timeout() => Err(invalid(
                "worker.heartbeat_interval_ms must be below queue.visibility_timeout_secs",
            )),
            _ => Ok(()),
        }
    }
}

fn invalid(msg: &str) -> StrandError {
    StrandError::InvalidConfig(msg.to_string())
}
