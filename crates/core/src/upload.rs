//! Types shared by the watcher, the ingestion workflow and notification delivery.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::manifest::{Manifest, ParseError};

/// Name of the drop directory inside every watch target.
pub const INCOMING_DIR: &str = "incoming";

/// A directory under the watch root that owns an `incoming` drop directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WatchTarget {
    pub root: PathBuf,
    pub incoming: PathBuf,
}

impl WatchTarget {
    pub fn new(root: PathBuf) -> Self {
        let incoming = root.join(INCOMING_DIR);
        Self { root, incoming }
    }

    /// Last path component of the target root (e.g. `unstable`).
    pub fn name(&self) -> String {
        self.root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Where an upload is included and which signing home to use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepositoryContext {
    /// Repository base directory: the watch target owning the manifest.
    pub root: PathBuf,
    /// `<private_dir>/<target name>/.gnupg`.
    pub gnupg_home: PathBuf,
}

impl RepositoryContext {
    /// Resolve the context for a manifest at `<target>/incoming/<name>`.
    pub fn for_manifest(manifest_path: &Path, private_dir: &Path) -> Result<Self, ParseError> {
        let root = repository_root(manifest_path)?;
        let name = root
            .file_name()
            .ok_or_else(|| ParseError::Layout(manifest_path.to_path_buf()))?;
        let gnupg_home = private_dir.join(name).join(".gnupg");
        Ok(Self { root, gnupg_home })
    }
}

/// Climb out of `incoming` to the owning watch target.
pub fn repository_root(manifest_path: &Path) -> Result<PathBuf, ParseError> {
    let layout = || ParseError::Layout(manifest_path.to_path_buf());
    let incoming = manifest_path.parent().ok_or_else(layout)?;
    if incoming.file_name().and_then(|n| n.to_str()) != Some(INCOMING_DIR) {
        return Err(layout());
    }
    let root = incoming.parent().ok_or_else(layout)?;
    if root.as_os_str().is_empty() {
        return Ok(PathBuf::from("."));
    }
    Ok(root.to_path_buf())
}

/// Result of one ingestion workflow run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IngestionOutcome {
    Accepted { source: String, location: String },
    Rejected { reason: String },
}

impl IngestionOutcome {
    pub fn template(&self) -> Template {
        match self {
            IngestionOutcome::Accepted { .. } => Template::Accepted,
            IngestionOutcome::Rejected { .. } => Template::Rejected,
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, IngestionOutcome::Accepted { .. })
    }

    pub fn location(&self) -> Option<&str> {
        match self {
            IngestionOutcome::Accepted { location, .. } => Some(location.as_str()),
            IngestionOutcome::Rejected { .. } => None,
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            IngestionOutcome::Accepted { .. } => None,
            IngestionOutcome::Rejected { reason } => Some(reason.as_str()),
        }
    }
}

/// Notification template identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Template {
    Accepted,
    Rejected,
}

impl Template {
    pub const ALL: [Template; 2] = [Template::Accepted, Template::Rejected];

    pub fn name(self) -> &'static str {
        match self {
            Template::Accepted => "accepted",
            Template::Rejected => "rejected",
        }
    }
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Repository identity exposed to notification templates.
#[derive(Debug, Clone, Serialize)]
pub struct RepositoryInfo {
    pub root: PathBuf,
    /// Set for accepted uploads.
    pub location: Option<String>,
}

/// Everything a notification template can refer to.
#[derive(Debug, Clone, Serialize)]
pub struct UploadPayload {
    pub manifest_path: PathBuf,
    /// Absent when the manifest could not be parsed.
    pub manifest: Option<Manifest>,
    pub repository: RepositoryInfo,
    pub reason: Option<String>,
    pub from: String,
    pub to: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watch_target_paths() {
        let t = WatchTarget::new(PathBuf::from("/srv/repo/unstable"));
        assert_eq!(t.incoming, PathBuf::from("/srv/repo/unstable/incoming"));
        assert_eq!(t.name(), "unstable");
    }

    #[test]
    fn repository_root_is_watch_target() {
        let root = repository_root(Path::new("/srv/repo/unstable/incoming/foo_1.0.changes")).unwrap();
        assert_eq!(root, PathBuf::from("/srv/repo/unstable"));
    }

    #[test]
    fn repository_root_relative() {
        let root = repository_root(Path::new("unstable/incoming/foo.changes")).unwrap();
        assert_eq!(root, PathBuf::from("unstable"));
        let root = repository_root(Path::new("incoming/foo.changes")).unwrap();
        assert_eq!(root, PathBuf::from("."));
    }

    #[test]
    fn repository_root_requires_incoming() {
        let err = repository_root(Path::new("/srv/repo/unstable/foo.changes")).unwrap_err();
        assert!(matches!(err, ParseError::Layout(_)));
    }

    #[test]
    fn context_resolves_signing_home() {
        let ctx = RepositoryContext::for_manifest(
            Path::new("/srv/repo/unstable/incoming/foo.changes"),
            Path::new("/srv/private"),
        )
        .unwrap();
        assert_eq!(ctx.root, PathBuf::from("/srv/repo/unstable"));
        assert_eq!(ctx.gnupg_home, PathBuf::from("/srv/private/unstable/.gnupg"));
    }

    #[test]
    fn outcome_accessors() {
        let accepted = IngestionOutcome::Accepted {
            source: "foo".to_string(),
            location: "pool/main/f/foo".to_string(),
        };
        assert!(accepted.is_accepted());
        assert_eq!(accepted.template(), Template::Accepted);
        assert_eq!(accepted.location(), Some("pool/main/f/foo"));
        assert_eq!(accepted.reason(), None);

        let rejected = IngestionOutcome::Rejected {
            reason: "unknown distribution".to_string(),
        };
        assert_eq!(rejected.template(), Template::Rejected);
        assert_eq!(rejected.reason(), Some("unknown distribution"));
    }

    #[test]
    fn payload_shape_seen_by_templates() {
        let payload = UploadPayload {
            manifest_path: PathBuf::from("/srv/repo/unstable/incoming/foo.changes"),
            manifest: None,
            repository: RepositoryInfo {
                root: PathBuf::from("/srv/repo/unstable"),
                location: None,
            },
            reason: Some("missing required field: Source".to_string()),
            from: "intake@localhost".to_string(),
            to: "admin@example.com".to_string(),
        };
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["manifest"], serde_json::Value::Null);
        assert_eq!(value["repository"]["root"], "/srv/repo/unstable");
        assert_eq!(value["reason"], "missing required field: Source");
        assert_eq!(value["to"], "admin@example.com");

        let outcome = serde_json::to_value(IngestionOutcome::Rejected {
            reason: "frozen".to_string(),
        })
        .unwrap();
        assert_eq!(outcome, serde_json::json!({"status": "rejected", "reason": "frozen"}));
    }

    #[test]
    fn template_names() {
        assert_eq!(Template::Accepted.to_string(), "accepted");
        assert_eq!(Template::Rejected.name(), "rejected");
    }
}
