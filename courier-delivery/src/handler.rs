//! What the worker runs for each reserved job.

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use courier_queue::Job;
use courier_smtp::{AttachmentResolver, LocalAttachmentResolver, OutgoingMessage, Transport};
use tracing::{debug, warn};

/// Result of executing one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// The job is done and can be acknowledged.
    Success,
    /// The attempt failed; try again later if attempts remain.
    Retry(String),
    /// The job can never succeed; move it to the failed collection now.
    Fail(String),
}

impl JobOutcome {
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &Job) -> JobOutcome;
}

/// The job kind [`MailJobHandler`] serves.
pub const SEND_MAIL: &str = "send_mail";

/// Sends `send_mail` jobs through a [`Transport`].
///
/// Every transport or attachment error is a [`JobOutcome::Retry`]; the only
/// immediate failure is a payload naming a job kind this handler does not serve.
pub struct MailJobHandler {
    transport: Arc<dyn Transport>,
    attachments: Arc<dyn AttachmentResolver>,
}

impl fmt::Debug for MailJobHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MailJobHandler")
            .field("transport", &self.transport.kind())
            .field("attachments", &self.attachments)
            .finish()
    }
}

impl MailJobHandler {
    /// A handler that reads attachments from the local filesystem.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            attachments: Arc::new(LocalAttachmentResolver::new()),
        }
    }

    #[must_use]
    pub fn with_attachments(mut self, resolver: Arc<dyn AttachmentResolver>) -> Self {
        self.attachments = resolver;
        self
    }

    async fn message_for(&self, job: &Job) -> Result<OutgoingMessage, String> {
        let payload = &job.payload;

        let mut message = OutgoingMessage::for_recipients(&payload.to);
        message.from.clone_from(&payload.from);
        message.subject.clone_from(&payload.subject);
        if !payload.content.is_empty() || payload.html.is_none() {
            message.text = Some(payload.content.clone());
        }
        message.html.clone_from(&payload.html);

        for reference in &payload.attachments {
            let attachment = self
                .attachments
                .resolve(reference)
                .await
                .map_err(|err| err.to_string())?;
            message.attachments.push(attachment);
        }

        Ok(message)
    }
}

#[async_trait]
impl JobHandler for MailJobHandler {
    async fn handle(&self, job: &Job) -> JobOutcome {
        if job.payload.job != SEND_MAIL {
            return JobOutcome::Fail(format!("No handler for job '{}'", job.payload.job));
        }

        if let Some(hint) = job.payload.transport.as_deref()
            && !hint.eq_ignore_ascii_case(&self.transport.kind().to_string())
        {
            warn!(
                job_id = %job.id,
                requested = %hint,
                using = %self.transport.kind(),
                "Requested transport is not configured"
            );
        }

        let message = match self.message_for(job).await {
            Ok(message) => message,
            Err(reason) => return JobOutcome::Retry(reason),
        };

        match self.transport.send(&message).await {
            Ok(receipt) => {
                debug!(
                    job_id = %job.id,
                    message_id = %receipt.message_id,
                    detail = %receipt.detail,
                    "Message handed to transport"
                );
                JobOutcome::Success
            }
            Err(err) => JobOutcome::Retry(err.to_string()),
        }
    }
}
