//! Runs queued mail jobs.
//!
//! A [`Mailer`] puts jobs on a queue; a [`Worker`] reserves them, hands each
//! one to a [`JobHandler`] and resolves it from the [`JobOutcome`]:
//! acknowledged on success, released with a [`RetryPolicy`] delay while
//! attempts remain, failed otherwise.

mod error;
mod handler;
mod mailer;
mod memory;
pub mod policy;
mod worker;

pub use error::{Result, WorkerError};
pub use handler::{JobHandler, JobOutcome, MailJobHandler, SEND_MAIL};
pub use mailer::Mailer;
pub use memory::{FixedMemory, MemoryGauge, ProcessMemory};
pub use policy::RetryPolicy;
pub use worker::{DEFAULT_QUEUE, ProcessedJob, Resolution, Worker, WorkerExit, minimum_lease};
