//! # Webhook Notifier
//!
//! Fire-and-forget chat notifications: `notify` spawns a JSON POST to an
//! incoming-webhook URL on the current tokio runtime and returns at once.
//! Delivery failures are logged, never returned.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("webhook url is not set")]
    NotConfigured,

    #[error("no tokio runtime to deliver the webhook on")]
    NoRuntime,

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("webhook rejected the message with status {0}")]
    Status(u16),
}

/// Webhook settings. `icon` starting with `:` is an emoji name, anything
/// else is an image URL.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    pub url: String,
    pub username: Option<String>,
    pub icon: Option<String>,
    pub channel: Option<String>,
}

/// JSON body posted to the webhook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WebhookPayload {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon_emoji: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
}

#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    config: WebhookConfig,
}

impl WebhookNotifier {
    pub fn new(config: WebhookConfig) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(WebhookNotifier { client, config })
    }

    pub fn is_configured(&self) -> bool {
        !self.config.url.is_empty()
    }

    /// Builds the body for `text`; empty optional settings are omitted.
    pub fn payload(&self, text: &str) -> WebhookPayload {
        let non_empty = |value: &Option<String>| value.clone().filter(|v| !v.is_empty());
        let icon = non_empty(&self.config.icon);
        let (icon_emoji, icon_url) = match icon {
            Some(icon) if icon.starts_with(':') => (Some(icon), None),
            Some(icon) => (None, Some(icon)),
            None => (None, None),
        };
        WebhookPayload {
            text: text.to_string(),
            username: non_empty(&self.config.username),
            icon_emoji,
            icon_url,
            channel: non_empty(&self.config.channel),
        }
    }

    /// Queues `text` for delivery and returns without waiting.
    ///
    /// Only a missing URL or a missing runtime is reported to the caller.
    pub fn notify(&self, text: &str) -> Result<JoinHandle<()>, NotifyError> {
        if !self.is_configured() {
            return Err(NotifyError::NotConfigured);
        }
        let runtime = Handle::try_current().map_err(|_| NotifyError::NoRuntime)?;

        let notifier = self.clone();
        let payload = self.payload(text);
        Ok(runtime.spawn(async move {
            if let Err(err) = notifier.post(&payload).await {
                warn!(error = %err, "webhook delivery failed");
            }
        }))
    }

    /// Posts `text` and waits for the webhook's answer.
    pub async fn send(&self, text: &str) -> Result<(), NotifyError> {
        if !self.is_configured() {
            return Err(NotifyError::NotConfigured);
        }
        self.post(&self.payload(text)).await
    }

    async fn post(&self, payload: &WebhookPayload) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(&self.config.url)
            .json(payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::Status(status.as_u16()));
        }
        debug!(status = status.as_u16(), "webhook delivered");
        Ok(())
    }
}
