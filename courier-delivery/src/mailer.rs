use std::sync::Arc;

use courier_common::{EventSink, MailEvent};
use courier_queue::{JobId, MailPayload, QueueStore};

/// Producer side of the queue: puts mail jobs on a queue and announces them.
#[derive(Clone)]
pub struct Mailer {
    store: Arc<dyn QueueStore>,
    events: Arc<dyn EventSink>,
}

impl std::fmt::Debug for Mailer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mailer")
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

impl Mailer {
    pub fn new(store: Arc<dyn QueueStore>, events: Arc<dyn EventSink>) -> Self {
        Self { store, events }
    }

    /// Enqueue `payload` on `queue` and emit [`MailEvent::Queued`].
    ///
    /// # Errors
    /// Any error from the underlying store; nothing is emitted in that case.
    pub async fn queue(&self, queue: &str, payload: MailPayload) -> courier_queue::Result<JobId> {
        let to = payload.to.clone();
        let subject = payload.subject.clone();
        let id = self.store.enqueue(queue, payload).await?;

        self.events.emit(&MailEvent::Queued {
            job_id: id.to_string(),
            queue: queue.to_string(),
            to,
            subject,
            attempts: 0,
            delay_ms: 0,
        });

        Ok(id)
    }

    pub fn store(&self) -> &Arc<dyn QueueStore> {
        &self.store
    }
}
