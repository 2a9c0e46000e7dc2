//! Notifier that writes notifications to the `tracing` log.

use tracing::{debug, info};

use crate::traits::{Notification, NotificationKind, Notifier, NotifyError};

/// Logs each notification as a structured event; never fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait::async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        match notification.kind {
            NotificationKind::Individual => {
                info!(subject = %notification.subject, "error notification");
            }
            NotificationKind::Summary => {
                info!(
                    subject = %notification.subject,
                    occurrences = notification.metadata.get("occurrences").map(String::as_str).unwrap_or("?"),
                    first_seen = notification.metadata.get("first_seen").map(String::as_str).unwrap_or("?"),
                    "error summary"
                );
            }
        }
        debug!(body = %notification.body, "notification body");
        Ok(())
    }

    fn channel_name(&self) -> &str {
        "log"
    }
}
