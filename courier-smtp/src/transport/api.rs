use std::{fmt, time::Duration};

use async_trait::async_trait;
use base64::prelude::*;
use courier_common::TransportKind;
use courier_dkim::DkimConfig;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{Composer, OutgoingMessage, SendReceipt, Transport};
use crate::{Result, TransportConfigError, TransportError, message::envelope_address};

/// Settings for an HTTP mail provider.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiConfig {
    /// URL the message is POSTed to.
    pub endpoint: String,
    /// Sent as a bearer token.
    pub api_key: String,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,
}

impl fmt::Debug for ApiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiConfig")
            .field("endpoint", &self.endpoint)
            .field("api_key", &"<redacted>")
            .field("from", &self.from)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl ApiConfig {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            from: None,
            timeout_secs: defaults::timeout(),
        }
    }

    /// # Errors
    /// The first missing or unusable setting.
    pub fn validate(&self) -> std::result::Result<reqwest::Url, TransportConfigError> {
        if self.endpoint.trim().is_empty() {
            return Err(TransportConfigError::MissingField("endpoint"));
        }
        if self.api_key.trim().is_empty() {
            return Err(TransportConfigError::MissingField("api_key"));
        }
        if self.timeout_secs == 0 {
            return Err(TransportConfigError::MissingField("timeout_secs"));
        }

        let invalid = |reason: String| TransportConfigError::InvalidEndpoint {
            endpoint: self.endpoint.clone(),
            reason,
        };
        let url = reqwest::Url::parse(self.endpoint.trim()).map_err(|e| invalid(e.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(invalid(format!("unsupported scheme {}", url.scheme())));
        }
        Ok(url)
    }
}

mod defaults {
    pub const fn timeout() -> u64 {
        30
    }
}

/// Request body sent to the provider.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ApiRequest<'a> {
    from: &'a str,
    to: Vec<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    subject: Option<&'a str>,
    message_id: &'a str,
    /// The complete, signed message, base64 encoded.
    raw: String,
}

/// Delivers by POSTing the raw MIME message to an HTTP provider.
#[derive(Debug, Clone)]
pub struct ApiTransport {
    client: reqwest::Client,
    endpoint: reqwest::Url,
    api_key: String,
    composer: Composer,
}

impl ApiTransport {
    /// # Errors
    /// [`TransportConfigError`] if the provider settings or the DKIM key are invalid.
    pub fn new(
        config: ApiConfig,
        dkim: Option<&DkimConfig>,
    ) -> std::result::Result<Self, TransportConfigError> {
        let endpoint = config.validate()?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| TransportConfigError::HttpClient(e.to_string()))?;
        let composer = Composer::new(TransportKind::Api, config.from, dkim)?;

        debug!(endpoint = %endpoint, dkim = composer.signs(), "API transport ready");

        Ok(Self {
            client,
            endpoint,
            api_key: config.api_key,
            composer,
        })
    }
}

#[async_trait]
impl Transport for ApiTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Api
    }

    async fn send(&self, message: &OutgoingMessage) -> Result<SendReceipt> {
        let mime = self.composer.compose(message)?;
        let message_id = mime.header("Message-ID").unwrap_or_default();

        let request = ApiRequest {
            from: mime.header("From").map(envelope_address).unwrap_or_default(),
            to: message.to.iter().map(|to| envelope_address(to)).collect(),
            subject: message.subject.as_deref(),
            message_id,
            raw: BASE64_STANDARD.encode(mime.to_string()),
        };

        let response = self
            .client
            .post(self.endpoint.clone())
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(TransportError::Provider {
                status: status.as_u16(),
                body,
            });
        }

        // Providers commonly answer with their own id for the message.
        let detail = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|value| value.get("id").and_then(|id| id.as_str()).map(String::from))
            .unwrap_or(body);

        debug!(endpoint = %self.endpoint, message_id = %message_id, "Provider accepted message");

        Ok(SendReceipt {
            message_id: message_id.to_string(),
            detail,
        })
    }
}
