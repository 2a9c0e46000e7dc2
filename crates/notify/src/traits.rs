//! Notifier trait definition and shared error types.

use std::collections::HashMap;

use quell_core::ErrorRecord;

/// Errors that can occur during notification rendering and delivery.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Template rendering failed: {0}")]
    Template(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Delivery failed: {0}")]
    Delivery(String),
}

/// Whether a notification describes one error or a collapsed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Individual,
    Summary,
}

/// A rendered notification ready for delivery.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Notification {
    pub kind: NotificationKind,
    /// The rendered subject line.
    pub subject: String,
    /// The rendered body content.
    pub body: String,
    /// The record the notification describes (the run's first record for summaries).
    pub record: ErrorRecord,
    /// Additional metadata (rule name, occurrence count, first seen).
    pub metadata: HashMap<String, String>,
}

/// A notification sink.
///
/// Delivery failures are the sink's concern: the dispatcher logs and
/// reports them but never retries.
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver a notification through this channel.
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError>;

    /// Human-readable name for this channel (e.g., "log", "webhook").
    fn channel_name(&self) -> &str;
}

/// Result of delivering a notification to a single channel.
#[derive(Debug, Clone, serde::Serialize)]
pub struct DispatchResult {
    pub channel: String,
    pub kind: NotificationKind,
    pub success: bool,
    pub error: Option<String>,
    pub duration_ms: u64,
}
