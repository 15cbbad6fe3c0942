//! Watch target discovery and filesystem subscriptions.
//!
//! Every directory directly under the watch root must own an `incoming`
//! directory. All targets are validated before the first watch is registered,
//! so a bad layout fails startup without leaving partial registrations behind.
//! Directories created after startup are not picked up.

use std::fs;
use std::path::{Path, PathBuf};

use intake_core::WatchTarget;
use notify::event::{AccessKind, AccessMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::WatchError;

/// One filesystem notification for a single path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEvent {
    pub kind: EventKind,
    pub path: PathBuf,
}

impl ManifestEvent {
    pub fn new(kind: EventKind, path: PathBuf) -> Self {
        Self { kind, path }
    }

    /// A writer closed the file (inotify `IN_CLOSE_WRITE`): its contents are complete.
    pub fn is_close_write(&self) -> bool {
        matches!(
            self.kind,
            EventKind::Access(AccessKind::Close(AccessMode::Write))
        )
    }

    pub fn file_name(&self) -> Option<&str> {
        self.path.file_name().and_then(|n| n.to_str())
    }
}

/// Stream of events from every registered watch.
#[derive(Debug)]
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<ManifestEvent>,
}

impl Subscription {
    /// A subscription fed by the returned sender.
    pub fn channel() -> (mpsc::UnboundedSender<ManifestEvent>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self { rx })
    }

    /// Next event; `None` once every sender (i.e. the watcher) is gone.
    pub async fn recv(&mut self) -> Option<ManifestEvent> {
        self.rx.recv().await
    }
}

/// Enumerate the watch targets under `root`.
///
/// Non-directory entries are ignored. A directory without `incoming` fails
/// with [`WatchError::MissingIncomingDirectory`]; an empty root fails with
/// [`WatchError::NoTargets`].
pub fn discover_targets(root: &Path) -> Result<Vec<WatchTarget>, WatchError> {
    let read_err = |source| WatchError::ReadRoot {
        root: root.to_path_buf(),
        source,
    };

    let mut targets = Vec::new();
    for entry in fs::read_dir(root).map_err(read_err)? {
        let entry = entry.map_err(read_err)?;
        if !entry.file_type().map_err(read_err)?.is_dir() {
            continue;
        }

        let target = WatchTarget::new(entry.path());
        if !target.incoming.is_dir() {
            return Err(WatchError::MissingIncomingDirectory {
                path: target.incoming,
            });
        }
        targets.push(target);
    }

    if targets.is_empty() {
        return Err(WatchError::NoTargets {
            root: root.to_path_buf(),
        });
    }

    targets.sort_by(|a, b| a.root.cmp(&b.root));
    Ok(targets)
}

/// Holds the OS watches for every target's `incoming` directory.
///
/// Dropping the watcher ends the subscription.
pub struct DirectoryWatcher {
    targets: Vec<WatchTarget>,
    _watcher: RecommendedWatcher,
}

impl DirectoryWatcher {
    /// Discover targets under `root` and watch all of them.
    pub fn start(root: &Path) -> Result<(Self, Subscription), WatchError> {
        let targets = discover_targets(root)?;
        Self::watch(targets)
    }

    /// Register one non-recursive watch per target.
    pub fn watch(targets: Vec<WatchTarget>) -> Result<(Self, Subscription), WatchError> {
        let (tx, subscription) = Subscription::channel();

        let mut watcher = notify::recommended_watcher(
            move |res: std::result::Result<Event, notify::Error>| match res {
                Ok(event) => forward_event(&tx, event),
                Err(e) => warn!(error = %e, "filesystem watcher error"),
            },
        )?;

        for target in &targets {
            watcher
                .watch(&target.incoming, RecursiveMode::NonRecursive)
                .map_err(|source| WatchError::WatchRegistration {
                    path: target.incoming.clone(),
                    source,
                })?;
            info!(
                target = %target.name(),
                path = %target.incoming.display(),
                "watching incoming directory"
            );
        }

        Ok((
            Self {
                targets,
                _watcher: watcher,
            },
            subscription,
        ))
    }

    pub fn targets(&self) -> &[WatchTarget] {
        &self.targets
    }
}

/// Split a backend event into one [`ManifestEvent`] per path.
fn forward_event(tx: &mpsc::UnboundedSender<ManifestEvent>, event: Event) {
    let Event { kind, paths, .. } = event;
    for path in paths {
        if tx.send(ManifestEvent::new(kind, path)).is_err() {
            debug!("subscription dropped, discarding filesystem event");
            return;
        }
    }
}
