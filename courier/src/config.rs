//! The configuration file.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::Context;
use courier_common::{ConnectionConfig, EventSink, WorkerConfig};
use courier_delivery::{DEFAULT_QUEUE, MailJobHandler, RetryPolicy, Worker, minimum_lease};
use courier_dkim::DkimConfig;
use courier_queue::{QueueConfig, QueueStore};
use courier_smtp::{HttpAttachmentResolver, LocalAttachmentResolver, TransportConfig};
use serde::Deserialize;

/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "COURIER_CONFIG";

const DEFAULT_PATHS: [&str; 2] = ["./courier.config.ron", "/etc/courier/courier.config.ron"];

/// Where attachment content is read from.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AttachmentConfig {
    /// Directory relative attachment paths are resolved against.
    #[serde(default)]
    pub root: Option<PathBuf>,
    /// Seconds allowed for fetching a remote attachment.
    #[serde(default = "defaults::fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
}

impl Default for AttachmentConfig {
    fn default() -> Self {
        Self {
            root: None,
            fetch_timeout_secs: defaults::fetch_timeout_secs(),
        }
    }
}

/// Everything a worker or the admin tool needs.
///
/// ```ron
/// Courier (
///     connection: (host: "127.0.0.1", port: 6379),
///     queue: (prefix: "courier:"),
///     queues: ["emails", "default"],
///     worker: (sleep: 3.0, max_tries: 3, memory: 128, timeout: 60),
///     transport: Smtp((host: "relay.example.com", port: 587)),
///     dkim: Some((private_key_path: Some("/etc/courier/dkim.pem"), selector: "mail", domain: "example.com")),
/// )
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct Courier {
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    /// Queues a worker polls, highest priority first.
    #[serde(default = "defaults::queues")]
    pub queues: Vec<String>,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub retry: RetryPolicy,
    pub transport: TransportConfig,
    #[serde(default)]
    pub dkim: Option<DkimConfig>,
    #[serde(default)]
    pub attachments: AttachmentConfig,
}

impl Courier {
    /// Read and validate a configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, does not parse, or holds
    /// an invalid retry policy.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid config in {}", path.display()))
    }

    /// # Errors
    ///
    /// Returns an error if `content` does not parse or fails validation.
    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let courier: Self = ron::from_str(content)?;
        courier.retry.validate()?;
        if courier.queues.is_empty() {
            anyhow::bail!("At least one queue must be configured");
        }
        let required = minimum_lease(&courier.worker);
        if courier.queue.lease() <= required {
            anyhow::bail!(
                "queue.lease_secs ({}) must be longer than worker.timeout plus resolution retries ({:?})",
                courier.queue.lease_secs,
                required
            );
        }
        Ok(courier)
    }

    /// Build the configured queue store. No connection is made until first use.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue settings are invalid.
    pub fn store(&self) -> anyhow::Result<Arc<dyn QueueStore>> {
        Ok(self.queue.clone().into_store(&self.connection)?)
    }

    /// Build a worker for the configured queues on `store`.
    ///
    /// # Errors
    ///
    /// Returns an error if the DKIM key cannot be read or the transport
    /// settings are invalid.
    pub fn worker(
        &self,
        store: Arc<dyn QueueStore>,
        events: Arc<dyn EventSink>,
    ) -> anyhow::Result<Worker> {
        let dkim = self
            .dkim
            .clone()
            .map(|mut dkim| dkim.load_key().map(|()| dkim))
            .transpose()
            .context("Failed to load DKIM key")?;

        let transport = self.transport.clone().into_transport(dkim.as_ref())?;

        let local = self
            .attachments
            .root
            .clone()
            .map_or_else(LocalAttachmentResolver::new, LocalAttachmentResolver::with_root);
        let attachments = HttpAttachmentResolver::new(Duration::from_secs(
            self.attachments.fetch_timeout_secs,
        ))?
        .with_local(local);

        let handler = MailJobHandler::new(transport).with_attachments(Arc::new(attachments));

        Ok(
            Worker::new(store, Arc::new(handler), events, self.worker.clone())
                .with_queues(self.queues.clone())
                .with_retry_policy(self.retry.clone()),
        )
    }
}

/// Find the configuration file using the following precedence:
/// 1. `COURIER_CONFIG` environment variable
/// 2. ./courier.config.ron (current working directory)
/// 3. /etc/courier/courier.config.ron (system-wide config)
///
/// # Errors
///
/// Returns an error if `COURIER_CONFIG` names a missing file, or if none of
/// the default locations exist.
pub fn find_config_file() -> anyhow::Result<PathBuf> {
    if let Ok(env_path) = std::env::var(CONFIG_ENV) {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return Ok(path);
        }
        anyhow::bail!("{CONFIG_ENV} points to non-existent file: {}", path.display());
    }

    if let Some(path) = DEFAULT_PATHS.iter().map(PathBuf::from).find(|p| p.exists()) {
        return Ok(path);
    }

    let paths_tried = DEFAULT_PATHS
        .iter()
        .map(|p| format!("  - {p}"))
        .collect::<Vec<_>>()
        .join("\n");

    anyhow::bail!(
        "No configuration file found. Tried:\n  - {CONFIG_ENV} environment variable\n{paths_tried}"
    )
}

mod defaults {
    use super::DEFAULT_QUEUE;

    pub fn queues() -> Vec<String> {
        vec![DEFAULT_QUEUE.to_string()]
    }

    pub const fn fetch_timeout_secs() -> u64 {
        30
    }
}
