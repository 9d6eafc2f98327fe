//! Job queue for outbound mail.
//!
//! Producers [`enqueue`](QueueStore::enqueue) a [`MailPayload`]; workers
//! [`reserve`](QueueStore::reserve) jobs and resolve each one by acknowledging,
//! releasing or failing it. Two stores are provided:
//!
//! - [`RedisQueueStore`]: shared between processes through a key-value store
//! - [`MemoryQueueStore`]: process-local, with identical semantics

pub mod backends;
pub mod config;
pub mod error;
pub mod job;
pub mod store;

pub use backends::{MemoryQueueStore, RedisQueueStore};
pub use config::{QueueConfig, StoreBackend};
pub use error::{QueueError, Result};
pub use job::{AttachmentRef, FailedJob, Job, JobId, MailPayload};
pub use store::{QueueStats, QueueStore};
