//! Turning an [`AttachmentRef`] from a job payload into bytes.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use async_trait::async_trait;
use courier_queue::AttachmentRef;
use tracing::debug;

use crate::{
    Result, TransportError,
    message::{Attachment, guess_content_type},
};

/// Loads attachment content for the mail handler.
#[async_trait]
pub trait AttachmentResolver: Send + Sync + std::fmt::Debug {
    /// # Errors
    /// [`TransportError::Attachment`] when the source cannot be read.
    async fn resolve(&self, reference: &AttachmentRef) -> Result<Attachment>;
}

fn failure(reference: &AttachmentRef, reason: impl ToString) -> TransportError {
    TransportError::Attachment {
        source_ref: reference.source.clone(),
        reason: reason.to_string(),
    }
}

/// Reads attachments from the local filesystem.
///
/// Relative paths are taken from `root` when one is set, otherwise from the
/// working directory.
#[derive(Debug, Clone, Default)]
pub struct LocalAttachmentResolver {
    root: Option<PathBuf>,
}

impl LocalAttachmentResolver {
    pub const fn new() -> Self {
        Self { root: None }
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    fn path_for(&self, source: &str) -> PathBuf {
        let path = Path::new(source);
        match &self.root {
            Some(root) if path.is_relative() => root.join(path),
            _ => path.to_path_buf(),
        }
    }
}

#[async_trait]
impl AttachmentResolver for LocalAttachmentResolver {
    async fn resolve(&self, reference: &AttachmentRef) -> Result<Attachment> {
        if reference.is_remote() {
            return Err(failure(reference, "remote attachments are not supported"));
        }

        let path = self.path_for(&reference.source);
        let data = tokio::fs::read(&path)
            .await
            .map_err(|err| failure(reference, err))?;

        debug!(path = %path.display(), size = data.len(), "Loaded attachment");

        Ok(Attachment {
            filename: reference.display_name().to_string(),
            content_type: reference
                .content_type
                .clone()
                .unwrap_or_else(|| guess_content_type(&path).to_string()),
            data,
        })
    }
}

/// Fetches `http(s)://` attachments, and hands everything else to a
/// [`LocalAttachmentResolver`].
#[derive(Debug, Clone)]
pub struct HttpAttachmentResolver {
    client: reqwest::Client,
    local: LocalAttachmentResolver,
}

impl HttpAttachmentResolver {
    /// # Errors
    /// Returns the underlying error if the HTTP client cannot be built.
    pub fn new(timeout: Duration) -> std::result::Result<Self, reqwest::Error> {
        Ok(Self {
            client: reqwest::Client::builder().timeout(timeout).build()?,
            local: LocalAttachmentResolver::new(),
        })
    }

    #[must_use]
    pub fn with_local(mut self, local: LocalAttachmentResolver) -> Self {
        self.local = local;
        self
    }
}

#[async_trait]
impl AttachmentResolver for HttpAttachmentResolver {
    async fn resolve(&self, reference: &AttachmentRef) -> Result<Attachment> {
        if !reference.is_remote() {
            return self.local.resolve(reference).await;
        }

        let response = self
            .client
            .get(&reference.source)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|err| failure(reference, err))?;

        let served_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let data = response
            .bytes()
            .await
            .map_err(|err| failure(reference, err))?;

        debug!(url = %reference.source, size = data.len(), "Fetched attachment");

        let filename = reference.display_name();
        let content_type = reference
            .content_type
            .clone()
            .or(served_type)
            .unwrap_or_else(|| {
                let path = reference.source.split(['?', '#']).next().unwrap_or_default();
                guess_content_type(Path::new(path)).to_string()
            });

        Ok(Attachment {
            filename: filename
                .split(['?', '#'])
                .next()
                .unwrap_or(filename)
                .to_string(),
            content_type,
            data: data.to_vec(),
        })
    }
}
