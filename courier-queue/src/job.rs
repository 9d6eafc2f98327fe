//! Jobs as they are stored in, and handed out by, a queue store.

use std::{fmt, str::FromStr};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::QueueError;

static GENERATOR: Mutex<ulid::Generator> = parking_lot::const_mutex(ulid::Generator::new());

/// Identifier for a queued job.
///
/// A ULID: globally unique, and lexicographically ordered by creation time,
/// which is what breaks ties between jobs that become available in the same
/// millisecond.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(ulid::Ulid);

impl JobId {
    /// Generate a new unique job id.
    ///
    /// Ids generated by one process within the same millisecond are strictly
    /// increasing.
    #[must_use]
    pub fn generate() -> Self {
        let mut generator = GENERATOR.lock();
        Self(generator.generate().unwrap_or_else(|_| ulid::Ulid::new()))
    }

    #[must_use]
    pub const fn ulid(&self) -> ulid::Ulid {
        self.0
    }

    /// Milliseconds since the unix epoch encoded in the id.
    #[must_use]
    pub const fn timestamp_ms(&self) -> u64 {
        self.0.timestamp_ms()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ulid::Ulid::from_string(s.trim())
            .map(Self)
            .map_err(|_| QueueError::InvalidId(s.to_string()))
    }
}

impl Serialize for JobId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for JobId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        ulid::Ulid::from_string(&s)
            .map(Self)
            .map_err(serde::de::Error::custom)
    }
}

/// A file to attach, referenced by local path or URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentRef {
    /// Filesystem path or `http(s)://` URL.
    pub source: String,
    /// Name presented to the recipient. Defaults to the last path segment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

impl AttachmentRef {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            filename: None,
            content_type: None,
        }
    }

    #[must_use]
    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    #[must_use]
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Whether the source must be fetched over HTTP.
    pub fn is_remote(&self) -> bool {
        self.source.starts_with("http://") || self.source.starts_with("https://")
    }

    /// The name to present for this attachment.
    pub fn display_name(&self) -> &str {
        self.filename.as_deref().unwrap_or_else(|| {
            self.source
                .trim_end_matches('/')
                .rsplit(['/', '\\'])
                .next()
                .filter(|name| !name.is_empty())
                .unwrap_or("attachment")
        })
    }
}

/// What a mail job asks the worker to send.
///
/// Unknown fields are kept in `extra` so producers can pass data through to
/// newer handlers without a schema change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MailPayload {
    /// Handler that should process this job.
    #[serde(default = "defaults::job")]
    pub job: String,
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    /// Plain text body.
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<AttachmentRef>,
    /// Name of the transport to use, when more than one is configured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transport: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl MailPayload {
    pub fn new(to: impl Into<String>) -> Self {
        Self {
            job: defaults::job(),
            to: to.into(),
            from: None,
            subject: None,
            content: String::new(),
            html: None,
            attachments: Vec::new(),
            transport: None,
            extra: Map::new(),
        }
    }

    #[must_use]
    pub fn with_from(mut self, from: impl Into<String>) -> Self {
        self.from = Some(from.into());
        self
    }

    #[must_use]
    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    #[must_use]
    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }

    #[must_use]
    pub fn with_html(mut self, html: impl Into<String>) -> Self {
        self.html = Some(html.into());
        self
    }

    #[must_use]
    pub fn with_attachment(mut self, attachment: AttachmentRef) -> Self {
        self.attachments.push(attachment);
        self
    }

    #[must_use]
    pub fn with_job(mut self, job: impl Into<String>) -> Self {
        self.job = job.into();
        self
    }
}

/// A unit of work in a queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,
    pub queue: String,
    pub payload: MailPayload,
    /// Number of times the job has been reserved.
    pub attempts: u32,
    /// Unix milliseconds.
    pub enqueued_at: u64,
    /// Unix milliseconds before which the job must not be reserved.
    pub available_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reserved_at: Option<u64>,
}

impl Job {
    /// A fresh job, available immediately.
    pub fn new(queue: impl Into<String>, payload: MailPayload, now: u64) -> Self {
        Self {
            id: JobId::generate(),
            queue: queue.into(),
            payload,
            attempts: 0,
            enqueued_at: now,
            available_at: now,
            reserved_at: None,
        }
    }

    /// Reset the retry bookkeeping, as when moving a failed job back to its queue.
    pub(crate) const fn reset(&mut self, now: u64) {
        self.attempts = 0;
        self.available_at = now;
        self.reserved_at = None;
    }
}

/// A job that exhausted its attempts or was failed outright.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedJob {
    pub job: Job,
    /// Message of the error that ended the job.
    pub exception: String,
    /// Unix milliseconds.
    pub failed_at: u64,
    /// Always `false`: a failed record is only moved back by an explicit retry.
    #[serde(default)]
    pub will_retry: bool,
}

impl FailedJob {
    pub fn new(job: Job, exception: impl Into<String>, failed_at: u64) -> Self {
        Self {
            job,
            exception: exception.into(),
            failed_at,
            will_retry: false,
        }
    }

    pub const fn id(&self) -> JobId {
        self.job.id
    }
}

mod defaults {
    pub fn job() -> String {
        "send_mail".to_string()
    }
}
