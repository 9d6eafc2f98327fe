//! Mail lifecycle events.
//!
//! Events are plain data built by the queue and worker; an [`EventSink`]
//! decides what to do with them (log, count, forward). Nothing in the domain
//! logs itself.

use serde::{Deserialize, Serialize};

/// A lifecycle event for a single mail job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MailEvent {
    /// The job was enqueued, or released back to the queue for a retry.
    Queued {
        job_id: String,
        queue: String,
        to: String,
        subject: Option<String>,
        attempts: u32,
        /// Delay before the job becomes available again (0 for fresh jobs).
        delay_ms: u64,
    },
    /// The transport accepted the message.
    Sent {
        job_id: String,
        queue: String,
        to: String,
        subject: Option<String>,
        attempts: u32,
        duration_ms: u64,
    },
    /// An attempt failed.
    Failed {
        job_id: String,
        queue: String,
        to: String,
        subject: Option<String>,
        attempts: u32,
        error: String,
        will_retry: bool,
    },
}

impl MailEvent {
    /// The job this event refers to.
    pub fn job_id(&self) -> &str {
        match self {
            Self::Queued { job_id, .. } | Self::Sent { job_id, .. } | Self::Failed { job_id, .. } => {
                job_id
            }
        }
    }

    /// Short event name, as used in logs.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Queued { .. } => "queued",
            Self::Sent { .. } => "sent",
            Self::Failed { .. } => "failed",
        }
    }
}

/// Receives lifecycle events.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &MailEvent);
}

/// Delivers events to the tracing subscriber.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: &MailEvent) {
        match event {
            MailEvent::Queued {
                job_id,
                queue,
                to,
                attempts,
                delay_ms,
                ..
            } => crate::job!(
                level = INFO,
                job_id,
                queue = %queue,
                to = %to,
                attempts,
                delay_ms,
                "Message queued"
            ),
            MailEvent::Sent {
                job_id,
                queue,
                to,
                attempts,
                duration_ms,
                ..
            } => crate::job!(
                level = INFO,
                job_id,
                queue = %queue,
                to = %to,
                attempts,
                duration_ms,
                "Message sent"
            ),
            MailEvent::Failed {
                job_id,
                queue,
                to,
                attempts,
                error,
                will_retry: true,
                ..
            } => crate::job!(
                level = WARN,
                job_id,
                queue = %queue,
                to = %to,
                attempts,
                error = %error,
                "Message delivery failed, will retry"
            ),
            MailEvent::Failed {
                job_id,
                queue,
                to,
                attempts,
                error,
                will_retry: false,
                ..
            } => crate::job!(
                level = ERROR,
                job_id,
                queue = %queue,
                to = %to,
                attempts,
                error = %error,
                "Message delivery failed permanently"
            ),
        }
    }
}

/// Fan an event out to several sinks.
impl<S: EventSink> EventSink for Vec<S> {
    fn emit(&self, event: &MailEvent) {
        for sink in self {
            sink.emit(event);
        }
    }
}
