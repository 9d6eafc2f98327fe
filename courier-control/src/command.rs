//! Administrative command types

use std::str::FromStr;

use courier_queue::{JobId, QueueError};
use serde::{Deserialize, Serialize};

/// Which failed jobs a retry applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RetryTarget {
    /// Every record in the failed collection
    All,
    /// A single failed job
    Job(JobId),
}

impl FromStr for RetryTarget {
    type Err = QueueError;

    /// `all` (any case) or a job id.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("all") {
            Ok(Self::All)
        } else {
            s.parse().map(Self::Job)
        }
    }
}

/// A request to the administrative surface
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdminCommand {
    /// List pending and reserved jobs of one queue, or of every known queue
    List { queue: Option<String> },
    /// List the failed collection
    Failed,
    /// Move failed jobs back to their queues
    Retry(RetryTarget),
    /// Delete every failed record
    Flush,
    /// Delete the pending and reserved jobs of one queue (the default queue when omitted)
    Clear { queue: Option<String> },
    /// Delete the jobs and failed records of one queue, or of every queue
    Purge { queue: Option<String> },
    /// Per-queue counts
    Stats,
}

impl AdminCommand {
    /// Whether the command deletes data that cannot be recovered.
    pub const fn is_destructive(&self) -> bool {
        matches!(self, Self::Flush | Self::Clear { .. } | Self::Purge { .. })
    }
}
