//! Event loop turning filesystem notifications into ingestion tasks.

use std::fs;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use intake_core::WatchTarget;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn};

use crate::watcher::{ManifestEvent, Subscription};
use crate::workflow::IngestionWorkflow;

/// A manifest is ready once its writer closed it and the name carries the
/// manifest suffix.
pub fn is_manifest_ready(event: &ManifestEvent, suffix: &str) -> bool {
    event.is_close_write() && event.file_name().is_some_and(|name| name.ends_with(suffix))
}

/// Counters reported when the dispatcher stops.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchSummary {
    /// Raw events received from the subscription.
    pub events: u64,
    /// Workflows started, including the startup sweep.
    pub dispatched: u64,
    /// Workflow tasks that panicked.
    pub panicked: u64,
}

/// Spawns one [`IngestionWorkflow`] run per ready manifest.
///
/// The loop never waits on a workflow. A burst of uploads queues up as
/// pending tasks; the workflow itself caps how many reach the gateway.
pub struct IngestionDispatcher {
    workflow: Arc<IngestionWorkflow>,
    suffix: String,
    tasks: JoinSet<()>,
    summary: DispatchSummary,
}

impl IngestionDispatcher {
    pub fn new(workflow: Arc<IngestionWorkflow>) -> Self {
        let suffix = workflow.config().watch.manifest_suffix.clone();
        Self {
            workflow,
            suffix,
            tasks: JoinSet::new(),
            summary: DispatchSummary::default(),
        }
    }

    /// Number of workflow tasks not yet reaped.
    pub fn in_flight(&self) -> usize {
        self.tasks.len()
    }

    /// Filter one event and dispatch it if it names a completed manifest.
    pub fn handle(&mut self, event: ManifestEvent) {
        self.summary.events += 1;
        if !is_manifest_ready(&event, &self.suffix) {
            return;
        }
        debug!(path = %event.path.display(), "manifest ready");
        self.dispatch(event.path);
    }

    /// Start a workflow for `path` without waiting for it.
    pub fn dispatch(&mut self, path: PathBuf) {
        let workflow = Arc::clone(&self.workflow);
        self.spawn(async move {
            workflow.run(path).await;
        });
    }

    fn dispatch_existing(&mut self, path: PathBuf) {
        let workflow = Arc::clone(&self.workflow);
        self.spawn(async move {
            workflow.run_existing(path).await;
        });
    }

    fn spawn(&mut self, task: impl Future<Output = ()> + Send + 'static) {
        self.tasks.spawn(task);
        self.summary.dispatched += 1;
        self.reap();
    }

    /// Dispatch manifests already waiting in each target's incoming directory.
    ///
    /// Returns how many were dispatched. Unreadable directories are logged
    /// and skipped. Manifests modified within the sweep grace period are left
    /// to the close-write their writer has yet to emit.
    pub fn sweep(&mut self, targets: &[WatchTarget]) -> usize {
        let grace = self.workflow.config().watch.sweep_grace();
        let now = SystemTime::now();
        let mut found = Vec::new();
        for target in targets {
            let entries = match fs::read_dir(&target.incoming) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(path = %target.incoming.display(), error = %e, "cannot sweep incoming directory");
                    continue;
                }
            };
            for entry in entries.flatten() {
                let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
                let matches = entry
                    .file_name()
                    .to_str()
                    .is_some_and(|n| n.ends_with(&self.suffix));
                if !(is_file && matches) {
                    continue;
                }
                let age = entry
                    .metadata()
                    .and_then(|m| m.modified())
                    .ok()
                    .and_then(|modified| now.duration_since(modified).ok())
                    .unwrap_or(Duration::ZERO);
                if age < grace {
                    info!(path = %entry.path().display(), age_ms = age.as_millis() as u64, "skipping recently modified manifest");
                    continue;
                }
                found.push(entry.path());
            }
        }

        found.sort();
        let count = found.len();
        for path in found {
            info!(path = %path.display(), "dispatching pre-existing manifest");
            self.dispatch_existing(path);
        }
        count
    }

    /// Consume events until the subscription closes or `shutdown` resolves,
    /// then wait for in-flight workflows.
    pub async fn run<S>(mut self, mut subscription: Subscription, shutdown: S) -> DispatchSummary
    where
        S: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("shutdown requested, no longer accepting uploads");
                    break;
                }
                event = subscription.recv() => match event {
                    Some(event) => self.handle(event),
                    None => {
                        warn!("filesystem subscription closed");
                        break;
                    }
                },
            }
        }
        self.drain().await
    }

    /// Wait for every in-flight workflow and return the final counters.
    pub async fn drain(mut self) -> DispatchSummary {
        if !self.tasks.is_empty() {
            info!(in_flight = self.tasks.len(), "waiting for in-flight uploads");
        }
        while let Some(result) = self.tasks.join_next().await {
            self.record(result);
        }
        info!(
            events = self.summary.events,
            dispatched = self.summary.dispatched,
            panicked = self.summary.panicked,
            "dispatcher stopped"
        );
        self.summary
    }

    fn reap(&mut self) {
        while let Some(result) = self.tasks.try_join_next() {
            self.record(result);
        }
    }

    fn record(&mut self, result: Result<(), JoinError>) {
        if let Err(e) = result {
            if e.is_panic() {
                self.summary.panicked += 1;
                error!(error = %e, "ingestion task panicked");
            } else {
                warn!(error = %e, "ingestion task cancelled");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, AccessMode, CreateKind, EventKind, ModifyKind};

    fn event(kind: EventKind, name: &str) -> ManifestEvent {
        ManifestEvent::new(kind, PathBuf::from("/repo/unstable/incoming").join(name))
    }

    fn close_write() -> EventKind {
        EventKind::Access(AccessKind::Close(AccessMode::Write))
    }

    #[test]
    fn close_write_on_manifest_is_ready() {
        assert!(is_manifest_ready(&event(close_write(), "foo_1.0.changes"), ".changes"));
    }

    #[test]
    fn other_suffixes_are_ignored() {
        assert!(!is_manifest_ready(&event(close_write(), "foo.changes.tmp"), ".changes"));
        assert!(!is_manifest_ready(&event(close_write(), "foo_1.0.deb"), ".changes"));
        assert!(is_manifest_ready(&event(close_write(), "foo.upload"), ".upload"));
    }

    #[test]
    fn other_event_kinds_are_ignored() {
        for kind in [
            EventKind::Create(CreateKind::File),
            EventKind::Modify(ModifyKind::Any),
            EventKind::Access(AccessKind::Close(AccessMode::Read)),
            EventKind::Any,
        ] {
            assert!(!is_manifest_ready(&event(kind, "foo.changes"), ".changes"), "{kind:?}");
        }
    }
}
