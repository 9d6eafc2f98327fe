//! Administrative operations over a queue store

use std::sync::Arc;

use courier_delivery::DEFAULT_QUEUE;
use courier_queue::QueueStore;
use tracing::{info, warn};

use crate::{
    AdminCommand, ControlError, FailedSummary, JobSummary, QueueSummary, Report, Result,
    RetryTarget,
};

/// Runs [`AdminCommand`]s against a store shared with producers and workers.
#[derive(Debug, Clone)]
pub struct QueueAdmin {
    store: Arc<dyn QueueStore>,
}

impl QueueAdmin {
    pub fn new(store: Arc<dyn QueueStore>) -> Self {
        Self { store }
    }

    /// Execute a single command.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails, or if a single-job retry names a
    /// job that is not in the failed collection.
    pub async fn execute(&self, command: AdminCommand) -> Result<Report> {
        match command {
            AdminCommand::List { queue } => self.list(queue.as_deref()).await,
            AdminCommand::Failed => self.failed().await,
            AdminCommand::Retry(target) => self.retry(target).await,
            AdminCommand::Flush => self.flush().await,
            AdminCommand::Clear { queue } => self.clear(queue.as_deref()).await,
            AdminCommand::Purge { queue } => self.purge(queue.as_deref()).await,
            AdminCommand::Stats => self.stats().await,
        }
    }

    /// Pending and reserved jobs of `queue`, or of every known queue.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn list(&self, queue: Option<&str>) -> Result<Report> {
        let queues = match queue {
            Some(queue) => vec![queue.to_string()],
            None => self.store.queues().await?,
        };

        let mut jobs = Vec::new();
        for queue in &queues {
            jobs.extend(self.store.list(queue).await?.iter().map(JobSummary::from));
        }
        Ok(Report::Jobs(jobs))
    }

    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn failed(&self) -> Result<Report> {
        let records = self.store.list_failed().await?;
        Ok(Report::Failed(
            records.iter().map(FailedSummary::from).collect(),
        ))
    }

    /// Move one or every failed job back to its queue with a fresh attempt count.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::UnknownFailedJob`] if a single-job retry names
    /// an id with no failed record.
    pub async fn retry(&self, target: RetryTarget) -> Result<Report> {
        match target {
            RetryTarget::All => {
                let count = self.store.retry_all().await?;
                info!(count, "Retried all failed jobs");
                Ok(Report::Retried(count))
            }
            RetryTarget::Job(id) => {
                if !self.store.retry(&id).await? {
                    return Err(ControlError::UnknownFailedJob(id));
                }
                info!(job_id = %id, "Retried failed job");
                Ok(Report::Retried(1))
            }
        }
    }

    /// Delete every failed record.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn flush(&self) -> Result<Report> {
        let count = self.store.flush_failed().await?;
        warn!(count, "Flushed failed jobs");
        Ok(Report::Removed(count))
    }

    /// Delete the pending and reserved jobs of `queue` (the default queue
    /// when omitted). Failed records are kept.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn clear(&self, queue: Option<&str>) -> Result<Report> {
        let queue = queue.unwrap_or(DEFAULT_QUEUE);
        let count = self.store.clear(queue).await?;
        warn!(queue = %queue, count, "Cleared queue");
        Ok(Report::Removed(count))
    }

    /// Delete the jobs and failed records of `queue`, or of every queue.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn purge(&self, queue: Option<&str>) -> Result<Report> {
        let count = self.store.purge(queue).await?;
        warn!(queue = queue.unwrap_or("*"), count, "Purged queue");
        Ok(Report::Removed(count))
    }

    /// Counts for every known queue, plus the size of the failed collection.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn stats(&self) -> Result<Report> {
        let mut queues = Vec::new();
        for queue in self.store.queues().await? {
            let stats = self.store.stats(&queue).await?;
            queues.push(QueueSummary { queue, stats });
        }
        let failed = self.store.list_failed().await?.len();

        Ok(Report::Stats { queues, failed })
    }
}
