//! Repository inclusion backends.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use intake_core::RepositoryContext;
use tokio::process::Command;
use tracing::debug;

use crate::error::IncludeError;

/// Incorporates an upload's artifacts into a repository.
#[async_trait]
pub trait RepositoryGateway: Send + Sync {
    /// Include the upload described by `manifest_path` into `distribution`.
    ///
    /// Returns the location the upload was included at.
    async fn include(
        &self,
        distribution: &str,
        manifest_path: &Path,
        context: &RepositoryContext,
    ) -> Result<String, IncludeError>;
}

/// Runs `reprepro include` against the repository base directory.
#[derive(Debug, Clone)]
pub struct RepreproGateway {
    program: String,
}

impl RepreproGateway {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn command(
        &self,
        distribution: &str,
        manifest_path: &Path,
        context: &RepositoryContext,
    ) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("--basedir")
            .arg(&context.root)
            .arg("--gnupghome")
            .arg(&context.gnupg_home)
            .arg("include")
            .arg(distribution)
            .arg(manifest_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

impl Default for RepreproGateway {
    fn default() -> Self {
        Self::new("reprepro")
    }
}

#[async_trait]
impl RepositoryGateway for RepreproGateway {
    async fn include(
        &self,
        distribution: &str,
        manifest_path: &Path,
        context: &RepositoryContext,
    ) -> Result<String, IncludeError> {
        debug!(
            program = %self.program,
            basedir = %context.root.display(),
            distribution,
            manifest = %manifest_path.display(),
            "running repository include"
        );

        let output = self
            .command(distribution, manifest_path, context)
            .output()
            .await
            .map_err(IncludeError::Spawn)?;

        if output.status.success() {
            return Ok(context.root.display().to_string());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let stdout = String::from_utf8_lossy(&output.stdout);
        let message = if !stderr.trim().is_empty() {
            stderr.trim().to_string()
        } else if !stdout.trim().is_empty() {
            stdout.trim().to_string()
        } else {
            format!("{} exited with {}", self.program, output.status)
        };
        Err(IncludeError::Rejected(message))
    }
}
