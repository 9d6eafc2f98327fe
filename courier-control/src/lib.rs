//! Administrative surface over a courier queue store.
//!
//! Every operation acts on the store directly and is safe to run while
//! workers are active:
//! - Inspect pending and failed jobs, and per-queue counts
//! - Move failed jobs back to their queue
//! - Bulk deletion (`flush`, `clear`, `purge`), which cannot be undone
//!
//! Results are [`Report`]s that render for humans through `Display` and
//! serialize with serde for machine consumers.

pub mod admin;
pub mod command;
pub mod error;
pub mod report;

pub use admin::QueueAdmin;
pub use command::{AdminCommand, RetryTarget};
pub use error::{ControlError, Result};
pub use report::{FailedSummary, JobSummary, QueueSummary, Report};
