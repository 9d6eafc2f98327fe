use std::{sync::Arc, time::Duration};

use courier_common::config::ConnectionConfig;
use serde::Deserialize;

use crate::{QueueError, QueueStore, backends::MemoryQueueStore, backends::RedisQueueStore};

/// Which store implementation holds the queue.
///
/// ```ron
/// Courier (
///     queue: (
///         backend: Redis,
///         prefix: "mail:",
///     ),
/// )
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub enum StoreBackend {
    /// Shared key-value store; any number of workers and producers.
    #[default]
    Redis,
    /// Process-local store, for tests and single-process deployments.
    Memory,
}

/// Key naming and lease settings for a queue store.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct QueueConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    /// Prefix applied to every key the store writes.
    #[serde(default = "defaults::prefix")]
    pub prefix: String,
    /// Key of the failed-job collection. Defaults to `<prefix>failed`.
    #[serde(default)]
    pub failed_key: Option<String>,
    /// Seconds a reservation stays exclusive before another worker may reclaim it.
    #[serde(default = "defaults::lease_secs")]
    pub lease_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            prefix: defaults::prefix(),
            failed_key: None,
            lease_secs: defaults::lease_secs(),
        }
    }
}

impl QueueConfig {
    /// The key holding failed job records.
    pub fn failed_key(&self) -> String {
        self.failed_key
            .clone()
            .filter(|key| !key.is_empty())
            .unwrap_or_else(|| format!("{}failed", self.prefix))
    }

    pub const fn lease(&self) -> Duration {
        Duration::from_secs(self.lease_secs)
    }

    /// Check the settings that cannot be expressed in the type.
    ///
    /// # Errors
    /// Returns [`QueueError::Configuration`] when the lease is zero.
    pub fn validate(&self) -> crate::Result<()> {
        if self.lease_secs == 0 {
            return Err(QueueError::Configuration(
                "lease_secs must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Build the configured store as a trait object.
    ///
    /// # Errors
    /// Returns an error if the settings are invalid or the connection pool
    /// cannot be created. No connection is attempted until first use.
    pub fn into_store(self, connection: &ConnectionConfig) -> crate::Result<Arc<dyn QueueStore>> {
        self.validate()?;
        match self.backend {
            StoreBackend::Redis => Ok(Arc::new(RedisQueueStore::new(connection, self)?)),
            StoreBackend::Memory => Ok(Arc::new(MemoryQueueStore::with_config(self))),
        }
    }
}

mod defaults {
    pub fn prefix() -> String {
        "courier:".to_string()
    }

    pub const fn lease_secs() -> u64 {
        300
    }
}
