//! Per-upload ingestion: parse, verify, include, clean up, notify.
//!
//! Every upload that parses ends with its manifest and artifacts removed and
//! exactly one notification enqueued, whatever the repository said. Nothing
//! in here returns an error to the caller; failures become a
//! [`IngestionOutcome::Rejected`] or a log line.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use intake_core::{
    Config, IngestionOutcome, Manifest, ParseError, RepositoryContext, RepositoryInfo, Template,
    UploadPayload,
};
use intake_notify::NotificationSink;
use tokio::sync::Semaphore;
use tokio::task::JoinError;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::error::IncludeError;
use crate::gateway::RepositoryGateway;
use crate::locks::RepositoryLocks;
use crate::store::ManifestStore;

/// Drives one manifest through the ingestion state machine.
///
/// Shared by every in-flight upload. Inclusion into the same repository is
/// serialized through [`RepositoryLocks`]; at most `max_concurrent_uploads`
/// inclusions run at once across all repositories.
pub struct IngestionWorkflow {
    config: Arc<Config>,
    store: Arc<dyn ManifestStore>,
    gateway: Arc<dyn RepositoryGateway>,
    sink: Arc<dyn NotificationSink>,
    locks: RepositoryLocks,
    permits: Semaphore,
}

impl IngestionWorkflow {
    pub fn new(
        config: Arc<Config>,
        store: Arc<dyn ManifestStore>,
        gateway: Arc<dyn RepositoryGateway>,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        let permits = Semaphore::new(config.ingest.max_concurrent_uploads.max(1));
        Self {
            config,
            store,
            gateway,
            sink,
            locks: RepositoryLocks::new(),
            permits,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Process the manifest at `path`.
    ///
    /// Returns `None` when the manifest could not be parsed (no repository
    /// attempt was made), otherwise the outcome that was notified.
    pub async fn run(&self, path: PathBuf) -> Option<IngestionOutcome> {
        self.traced(path, true).await
    }

    /// Process a manifest found on disk rather than announced by a
    /// close-write. Its writer may still be busy, so an unparsable manifest
    /// is left in place for the close-write that follows.
    pub async fn run_existing(&self, path: PathBuf) -> Option<IngestionOutcome> {
        self.traced(path, false).await
    }

    async fn traced(&self, path: PathBuf, discard_unparsable: bool) -> Option<IngestionOutcome> {
        let span = info_span!(
            "upload",
            id = %Uuid::new_v4(),
            manifest = %path.display()
        );
        self.process(path, discard_unparsable).instrument(span).await
    }

    async fn process(&self, path: PathBuf, discard_unparsable: bool) -> Option<IngestionOutcome> {
        let (manifest, context) = match self.parse(&path).await {
            Ok(parsed) => parsed,
            Err(e) if discard_unparsable || e.is_not_found() => {
                self.parse_failed(&path, e).await;
                return None;
            }
            Err(e) => {
                warn!(error = %e, "pre-existing manifest not parsable yet, leaving it in place");
                return None;
            }
        };
        debug!(
            source = %manifest.source,
            distribution = %manifest.distribution,
            files = manifest.files.len(),
            repository = %context.root.display(),
            "manifest parsed"
        );

        let outcome = self.include(&manifest, &context).await;
        match &outcome {
            IngestionOutcome::Accepted { source, location } => {
                info!(source = %source, location = %location, "upload accepted");
            }
            IngestionOutcome::Rejected { reason } => {
                error!(source = %manifest.source, reason = %reason, "upload rejected");
            }
        }

        self.cleanup(&manifest).await;

        let payload = self.payload(
            path,
            Some(manifest),
            context.root,
            outcome.location().map(str::to_string),
            outcome.reason().map(str::to_string),
        );
        self.sink
            .notify(&self.config.notify.recipients(), outcome.template(), payload);

        Some(outcome)
    }

    /// Resolve the repository and parse the manifest.
    async fn parse(&self, path: &Path) -> Result<(Manifest, RepositoryContext), ParseError> {
        let context = RepositoryContext::for_manifest(path, &self.config.ingest.private_dir)?;
        let owned = path.to_path_buf();
        let manifest = self
            .blocking(move |store| store.parse(&owned))
            .await
            .map_err(|e| ParseError::Io(std::io::Error::other(e)))??;
        Ok((manifest, context))
    }

    async fn parse_failed(&self, path: &Path, err: ParseError) {
        if err.is_not_found() {
            debug!("manifest already gone, skipping");
            return;
        }
        error!(error = %err, "failed to parse manifest, discarding");

        let owned = path.to_path_buf();
        match self.blocking(move |store| store.discard(&owned)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "failed to discard unparsable manifest"),
            Err(e) => error!(error = %e, "discard task failed"),
        }

        if self.config.ingest.notify_parse_failures {
            let root = intake_core::repository_root(path)
                .unwrap_or_else(|_| path.parent().unwrap_or(Path::new(".")).to_path_buf());
            let payload = self.payload(path.to_path_buf(), None, root, None, Some(err.to_string()));
            self.sink
                .notify(&self.config.notify.recipients(), Template::Rejected, payload);
        }
    }

    /// Verify artifacts, then include under the repository lock and deadline.
    async fn include(&self, manifest: &Manifest, context: &RepositoryContext) -> IngestionOutcome {
        let owned = manifest.clone();
        match self.blocking(move |store| store.verify(&owned)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return rejected(e),
            Err(e) => return rejected(format!("artifact verification failed: {e}")),
        }

        let _guard = self.locks.acquire(&context.root).await;
        // Taken only once the repository is ours: uploads queued behind a
        // busy repository hold no permit.
        let Ok(_permit) = self.permits.acquire().await else {
            return rejected("ingestion is shutting down");
        };
        let timeout = self.config.ingest.include_timeout();
        let attempt = self
            .gateway
            .include(&manifest.distribution, &manifest.path, context);

        match tokio::time::timeout(timeout, attempt).await {
            Ok(Ok(location)) => IngestionOutcome::Accepted {
                source: manifest.source.clone(),
                location,
            },
            Ok(Err(e)) => rejected(e),
            Err(_) => rejected(IncludeError::TimedOut(timeout)),
        }
    }

    async fn cleanup(&self, manifest: &Manifest) {
        let owned = manifest.clone();
        match self.blocking(move |store| store.remove(&owned)).await {
            Ok(Ok(())) => debug!("upload files removed"),
            Ok(Err(e)) => error!(error = %e, "failed to remove upload files"),
            Err(e) => error!(error = %e, "cleanup task failed"),
        }
    }

    fn payload(
        &self,
        manifest_path: PathBuf,
        manifest: Option<Manifest>,
        root: PathBuf,
        location: Option<String>,
        reason: Option<String>,
    ) -> UploadPayload {
        let notify = &self.config.notify;
        if notify.administrator.is_none() {
            warn!("no administrator address configured");
        }
        UploadPayload {
            manifest_path,
            manifest,
            repository: RepositoryInfo { root, location },
            reason,
            from: notify.sender.clone(),
            to: notify.administrator.clone().unwrap_or_default(),
        }
    }

    /// Run a store call on the blocking pool.
    async fn blocking<T, F>(&self, f: F) -> Result<T, JoinError>
    where
        F: FnOnce(&dyn ManifestStore) -> T + Send + 'static,
        T: Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || f(store.as_ref())).await
    }
}

fn rejected(reason: impl ToString) -> IngestionOutcome {
    IngestionOutcome::Rejected {
        reason: reason.to_string(),
    }
}
