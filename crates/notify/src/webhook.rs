//! HTTP webhook notifier.
//!
//! Posts every notification as a JSON document to one endpoint. Delivery
//! is attempted once; a non-2xx response or transport error is reported
//! back to the dispatcher and not retried.

use std::collections::HashMap;
use std::time::Duration;

use serde::Serialize;

use crate::traits::{Notification, NotificationKind, Notifier, NotifyError};

/// JSON body posted to the webhook.
#[derive(Debug, Serialize)]
pub struct WebhookPayload<'a> {
    pub kind: NotificationKind,
    pub subject: &'a str,
    pub body: &'a str,
    pub error: Option<&'a str>,
    pub backtrace: Vec<String>,
    pub metadata: &'a HashMap<String, String>,
}

impl<'a> From<&'a Notification> for WebhookPayload<'a> {
    fn from(n: &'a Notification) -> Self {
        Self {
            kind: n.kind,
            subject: &n.subject,
            body: &n.body,
            error: n.record.error_message(),
            backtrace: n.record.signature(),
            metadata: &n.metadata,
        }
    }
}

/// Delivers notifications as JSON over HTTP POST.
#[derive(Debug)]
pub struct WebhookNotifier {
    url: reqwest::Url,
    /// Shared HTTP client (connection pooling, request timeout).
    client: reqwest::Client,
}

impl WebhookNotifier {
    /// Create a webhook notifier for `url`; each request gives up after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`NotifyError::Config`] for unparsable or non-HTTP URLs.
    pub fn new(url: &str, timeout: Duration) -> Result<Self, NotifyError> {
        let url = reqwest::Url::parse(url)
            .map_err(|e| NotifyError::Config(format!("invalid webhook URL '{url}': {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(NotifyError::Config(format!(
                "webhook URL must be http(s), got '{}'",
                url.scheme()
            )));
        }

        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { url, client })
    }

    pub fn url(&self) -> &str {
        self.url.as_str()
    }
}

#[async_trait::async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        let payload = WebhookPayload::from(notification);
        let response = self
            .client
            .post(self.url.clone())
            .json(&payload)
            .send()
            .await?;
        let status = response.status();

        if !status.is_success() {
            let body_text = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            tracing::warn!(
                url = %self.url,
                %status,
                body = %body_text,
                "webhook returned non-2xx status"
            );
            return Err(NotifyError::Delivery(format!(
                "webhook returned {status}: {body_text}"
            )));
        }

        tracing::debug!(url = %self.url, %status, "webhook notification delivered");
        Ok(())
    }

    fn channel_name(&self) -> &str {
        "webhook"
    }
}
