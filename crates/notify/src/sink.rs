//! Fire-and-forget notification delivery.
//!
//! [`QueuedSink`] accepts notification requests without waiting: each request
//! goes onto a bounded queue drained by a `NotificationWorker` that renders
//! the template and hands the message to a [`Notifier`]. Rendering and delivery
//! failures are logged by the worker and never reach the caller.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use intake_core::{Template, UploadPayload};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::templating::TemplateRenderer;
use crate::traits::{Notification, Notifier};

/// Destination for upload outcome notifications.
///
/// `notify` must not block; delivery errors are handled inside the sink.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, recipients: &[String], template: Template, payload: UploadPayload);
}

/// A queued request, rendered and delivered by the worker.
#[derive(Debug)]
struct NotificationRequest {
    recipients: Vec<String>,
    template: Template,
    payload: UploadPayload,
}

/// Bounded-queue [`NotificationSink`].
///
/// Dropping every clone of the sink closes the queue; the worker then drains
/// what is left and exits.
#[derive(Debug, Clone)]
pub struct QueuedSink {
    tx: mpsc::Sender<NotificationRequest>,
}

impl QueuedSink {
    /// Create the sink and spawn its worker on the current runtime.
    pub fn spawn(
        capacity: usize,
        renderer: TemplateRenderer,
        notifier: Arc<dyn Notifier>,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let worker = NotificationWorker { renderer, notifier };
        let handle = tokio::spawn(worker.run(rx));
        (Self { tx }, handle)
    }
}

impl NotificationSink for QueuedSink {
    fn notify(&self, recipients: &[String], template: Template, payload: UploadPayload) {
        let request = NotificationRequest {
            recipients: recipients.to_vec(),
            template,
            payload,
        };
        match self.tx.try_send(request) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(req)) => {
                tracing::warn!(
                    template = %req.template,
                    manifest = %req.payload.manifest_path.display(),
                    "notification queue full, dropping notification"
                );
            }
            Err(mpsc::error::TrySendError::Closed(req)) => {
                tracing::warn!(
                    template = %req.template,
                    manifest = %req.payload.manifest_path.display(),
                    "notification worker stopped, dropping notification"
                );
            }
        }
    }
}

/// Renders queued requests and delivers them through a notifier.
pub(crate) struct NotificationWorker {
    renderer: TemplateRenderer,
    notifier: Arc<dyn Notifier>,
}

impl NotificationWorker {
    /// Drain the queue until every sender is dropped.
    async fn run(self, mut rx: mpsc::Receiver<NotificationRequest>) {
        while let Some(request) = rx.recv().await {
            self.deliver(request).await;
        }
        tracing::debug!("notification queue closed, worker exiting");
    }

    async fn deliver(&self, request: NotificationRequest) {
        let NotificationRequest {
            recipients,
            template,
            payload,
        } = request;

        if recipients.is_empty() {
            tracing::warn!(
                template = %template,
                manifest = %payload.manifest_path.display(),
                "no administrator configured, notification not sent"
            );
            return;
        }

        let message = match self.renderer.render(template, &payload) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(template = %template, error = %e, "failed to render notification");
                return;
            }
        };

        let mut metadata = HashMap::from([("template".to_string(), template.name().to_string())]);
        if let Some(manifest) = &payload.manifest {
            metadata.insert("source".to_string(), manifest.source.clone());
        }

        let notification = Notification {
            recipients,
            subject: message.subject,
            body: message.body,
            metadata,
        };

        let start = Instant::now();
        let result = self.notifier.send(&notification).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(()) => tracing::debug!(
                template = %template,
                channel = self.notifier.channel_name(),
                duration_ms,
                "notification sent"
            ),
            Err(e) => tracing::warn!(
                template = %template,
                channel = self.notifier.channel_name(),
                error = %e,
                duration_ms,
                "notification delivery failed"
            ),
        }
    }
}
