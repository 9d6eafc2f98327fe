//! Worker loop limits.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Limits applied by a worker loop.
///
/// All four fields are validated together at construction; there is no way to
/// obtain a `WorkerConfig` with only some of them checked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawWorkerConfig")]
pub struct WorkerConfig {
    /// Idle poll interval in seconds when no job is available.
    sleep: f64,
    /// Maximum number of reservations before a job is failed.
    max_tries: u32,
    /// Resident memory ceiling in megabytes.
    memory: u64,
    /// Per-job execution budget in seconds.
    timeout: u64,
}

#[derive(Debug, Deserialize)]
struct RawWorkerConfig {
    #[serde(default = "defaults::sleep")]
    sleep: f64,
    #[serde(default = "defaults::max_tries")]
    max_tries: i64,
    #[serde(default = "defaults::memory")]
    memory: i64,
    #[serde(default = "defaults::timeout")]
    timeout: i64,
}

impl TryFrom<RawWorkerConfig> for WorkerConfig {
    type Error = ConfigError;

    fn try_from(raw: RawWorkerConfig) -> Result<Self, Self::Error> {
        let max_tries = u32::try_from(raw.max_tries)
            .map_err(|_| ConfigError::invalid("max_tries", "must be greater than 0"))?;
        let memory = u64::try_from(raw.memory)
            .map_err(|_| ConfigError::invalid("memory", "must be greater than 0"))?;
        let timeout = u64::try_from(raw.timeout)
            .map_err(|_| ConfigError::invalid("timeout", "must be greater than 0"))?;

        Self::new(raw.sleep, max_tries, memory, timeout)
    }
}

impl WorkerConfig {
    /// Build a validated worker config.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] naming the first invalid field:
    /// `sleep` must be finite and non-negative, the others strictly positive.
    pub fn new(sleep: f64, max_tries: u32, memory: u64, timeout: u64) -> Result<Self, ConfigError> {
        if !sleep.is_finite() || sleep < 0.0 {
            return Err(ConfigError::invalid(
                "sleep",
                format!("must be a non-negative number of seconds, got {sleep}"),
            ));
        }
        if max_tries == 0 {
            return Err(ConfigError::invalid("max_tries", "must be greater than 0"));
        }
        if memory == 0 {
            return Err(ConfigError::invalid("memory", "must be greater than 0"));
        }
        if timeout == 0 {
            return Err(ConfigError::invalid("timeout", "must be greater than 0"));
        }

        Ok(Self {
            sleep,
            max_tries,
            memory,
            timeout,
        })
    }

    /// Idle poll interval.
    pub fn sleep(&self) -> Duration {
        Duration::from_secs_f64(self.sleep)
    }

    pub const fn max_tries(&self) -> u32 {
        self.max_tries
    }

    /// Memory ceiling in megabytes.
    pub const fn memory_mb(&self) -> u64 {
        self.memory
    }

    /// Memory ceiling in bytes.
    pub const fn memory_bytes(&self) -> u64 {
        self.memory.saturating_mul(1024 * 1024)
    }

    /// Per-job execution budget.
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            sleep: defaults::sleep(),
            max_tries: 3,
            memory: 128,
            timeout: 60,
        }
    }
}

mod defaults {
    pub const fn sleep() -> f64 {
        3.0
    }

    pub const fn max_tries() -> i64 {
        3
    }

    pub const fn memory() -> i64 {
        128
    }

    pub const fn timeout() -> i64 {
        60
    }
}
