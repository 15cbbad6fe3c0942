//! Error types for watching, verifying, including and removing uploads.

use std::path::PathBuf;
use std::time::Duration;

/// Startup failures while enumerating or registering watch targets.
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error("watch target {} has no incoming directory", .path.display())]
    MissingIncomingDirectory { path: PathBuf },

    #[error("no watch targets found under {}", .root.display())]
    NoTargets { root: PathBuf },

    #[error("cannot read watch root {}: {source}", .root.display())]
    ReadRoot {
        root: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot watch {}: {source}", .path.display())]
    WatchRegistration {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },

    #[error("Notify watcher error: {0}")]
    Backend(#[from] notify::Error),
}

/// The repository refused or failed to include an upload.
#[derive(Debug, thiserror::Error)]
pub enum IncludeError {
    /// The repository tool ran and reported failure; carries its message.
    #[error("{0}")]
    Rejected(String),

    #[error("failed to run repository tool: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("inclusion timed out after {}s", .0.as_secs())]
    TimedOut(Duration),
}

/// Referenced artifacts do not match the manifest.
#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    #[error("missing file {0}")]
    Missing(String),

    #[error("size mismatch for {name}: manifest says {expected}, found {actual}")]
    SizeMismatch {
        name: String,
        expected: u64,
        actual: u64,
    },

    #[error("sha256 mismatch for {0}")]
    ChecksumMismatch(String),

    #[error("cannot read {name}: {source}")]
    Io {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

/// A manifest or artifact could not be deleted.
#[derive(Debug, thiserror::Error)]
#[error("failed to remove {}: {source}", .path.display())]
pub struct RemoveError {
    pub path: PathBuf,
    #[source]
    pub source: std::io::Error,
}
