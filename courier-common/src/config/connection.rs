//! Key-value store connection parameters.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Parameters for reaching the key-value store backing the queue.
///
/// Immutable once built; share it behind an `Arc` between workers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawConnectionConfig")]
pub struct ConnectionConfig {
    host: String,
    port: u16,
    username: Option<String>,
    password: Option<String>,
    database: u32,
    timeout_secs: u64,
}

/// Unvalidated form used for deserialization.
#[derive(Debug, Deserialize)]
struct RawConnectionConfig {
    #[serde(default = "defaults::host")]
    host: String,
    #[serde(default = "defaults::port")]
    port: u32,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
    #[serde(default)]
    database: i64,
    #[serde(default = "defaults::timeout_secs")]
    timeout_secs: u64,
}

impl TryFrom<RawConnectionConfig> for ConnectionConfig {
    type Error = ConfigError;

    fn try_from(raw: RawConnectionConfig) -> Result<Self, Self::Error> {
        let port = u16::try_from(raw.port)
            .map_err(|_| ConfigError::invalid("port", format!("{} exceeds 65535", raw.port)))?;
        let database = u32::try_from(raw.database).map_err(|_| {
            ConfigError::invalid("database", format!("{} is not a valid index", raw.database))
        })?;

        let mut config = Self::new(raw.host, port, raw.password, database, raw.timeout_secs)?;
        config.username = raw.username.filter(|u| !u.is_empty());
        Ok(config)
    }
}

impl ConnectionConfig {
    /// Build a validated connection config.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the host is empty, the port is zero or the
    /// timeout is zero.
    pub fn new(
        host: impl Into<String>,
        port: u16,
        password: Option<String>,
        database: u32,
        timeout_secs: u64,
    ) -> Result<Self, ConfigError> {
        let host = host.into();
        if host.trim().is_empty() {
            return Err(ConfigError::MissingField("host"));
        }
        if port == 0 {
            return Err(ConfigError::invalid("port", "must be between 1 and 65535"));
        }
        if timeout_secs == 0 {
            return Err(ConfigError::invalid("timeout_secs", "must be positive"));
        }

        Ok(Self {
            host,
            port,
            username: None,
            password: password.filter(|p| !p.is_empty()),
            database,
            timeout_secs,
        })
    }

    /// Attach a username (ACL auth). Empty names are ignored.
    #[must_use]
    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        let username = username.into();
        self.username = (!username.is_empty()).then_some(username);
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub const fn port(&self) -> u16 {
        self.port
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    pub const fn database(&self) -> u32 {
        self.database
    }

    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: defaults::host(),
            port: 6379,
            username: None,
            password: None,
            database: 0,
            timeout_secs: defaults::timeout_secs(),
        }
    }
}

mod defaults {
    pub fn host() -> String {
        "127.0.0.1".to_string()
    }

    pub const fn port() -> u32 {
        6379
    }

    pub const fn timeout_secs() -> u64 {
        5
    }
}
