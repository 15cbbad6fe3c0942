//! Log-only notifier, used when no SMTP relay is configured.

use crate::traits::{Notification, Notifier, NotifyError};

/// Writes each rendered notification to the tracing log instead of mailing it.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait::async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        tracing::info!(
            channel = "log",
            recipients = %notification.recipients.join(", "),
            subject = %notification.subject,
            body = %notification.body,
            "notification"
        );
        Ok(())
    }

    fn channel_name(&self) -> &str {
        "log"
    }
}
