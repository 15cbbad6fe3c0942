//! Reading, verifying and removing manifests and their artifacts on disk.

use std::fs::{self, File};
use std::io;
use std::path::Path;

use intake_core::{Manifest, ParseError};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{RemoveError, VerifyError};

/// Owns a manifest's lifecycle on storage.
///
/// Implementations are synchronous; the workflow moves slow calls onto the
/// blocking pool.
pub trait ManifestStore: Send + Sync {
    /// Read and parse the manifest at `path`.
    fn parse(&self, path: &Path) -> Result<Manifest, ParseError>;

    /// Check every referenced artifact against the manifest.
    fn verify(&self, manifest: &Manifest) -> Result<(), VerifyError>;

    /// Delete every referenced artifact and then the manifest itself.
    fn remove(&self, manifest: &Manifest) -> Result<(), RemoveError>;

    /// Delete only the manifest file. Used when it could not be parsed.
    fn discard(&self, path: &Path) -> Result<(), RemoveError>;
}

/// [`ManifestStore`] backed by the local filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsManifestStore;

impl ManifestStore for FsManifestStore {
    fn parse(&self, path: &Path) -> Result<Manifest, ParseError> {
        Manifest::from_file(path)
    }

    fn verify(&self, manifest: &Manifest) -> Result<(), VerifyError> {
        for (file, path) in manifest.files.iter().zip(manifest.artifact_paths()) {
            let io_err = |source: io::Error| {
                if source.kind() == io::ErrorKind::NotFound {
                    VerifyError::Missing(file.name.clone())
                } else {
                    VerifyError::Io {
                        name: file.name.clone(),
                        source,
                    }
                }
            };

            let actual = fs::metadata(&path).map_err(io_err)?.len();
            if actual != file.size {
                return Err(VerifyError::SizeMismatch {
                    name: file.name.clone(),
                    expected: file.size,
                    actual,
                });
            }

            if let Some(expected) = &file.sha256 {
                let mut hasher = Sha256::new();
                let mut reader = File::open(&path).map_err(io_err)?;
                io::copy(&mut reader, &mut hasher).map_err(io_err)?;
                let digest = format!("{:x}", hasher.finalize());
                if !digest.eq_ignore_ascii_case(expected) {
                    return Err(VerifyError::ChecksumMismatch(file.name.clone()));
                }
            }
        }
        Ok(())
    }

    fn remove(&self, manifest: &Manifest) -> Result<(), RemoveError> {
        let mut first_err = None;
        for path in manifest.artifact_paths().chain([manifest.path.clone()]) {
            if let Err(e) = remove_if_present(&path) {
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn discard(&self, path: &Path) -> Result<(), RemoveError> {
        remove_if_present(path)
    }
}

/// Delete `path`; a file that is already gone counts as removed.
fn remove_if_present(path: &Path) -> Result<(), RemoveError> {
    match fs::remove_file(path) {
        Ok(()) => {
            debug!(path = %path.display(), "removed");
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(RemoveError {
            path: path.to_path_buf(),
            source,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    // sha256 of the three bytes "foo".
    const FOO_SHA256: &str = "2c26b46b68ffc68ff99b453c1d30413413422d706483bfa0f98a5e886266e7ae";

    fn write_upload(dir: &Path, sha256: Option<&str>, deb: &[u8]) -> PathBuf {
        let mut text = String::from(
            "Source: foo\nVersion: 1.0\nDistribution: unstable\nFiles:\n \
             d3b07384d113edec49eaa6238ad5ff00 3 main/utils optional foo_1.0.deb\n",
        );
        if let Some(sum) = sha256 {
            text.push_str(&format!("Checksums-Sha256:\n {sum} 3 foo_1.0.deb\n"));
        }
        let manifest = dir.join("foo_1.0.changes");
        fs::write(&manifest, text).unwrap();
        fs::write(dir.join("foo_1.0.deb"), deb).unwrap();
        manifest
    }

    #[test]
    fn verify_accepts_matching_artifacts() {
        let dir = TempDir::new().unwrap();
        let path = write_upload(dir.path(), Some(FOO_SHA256), b"foo");
        let manifest = FsManifestStore.parse(&path).unwrap();
        FsManifestStore.verify(&manifest).unwrap();
    }

    #[test]
    fn verify_detects_size_mismatch() {
        let dir = TempDir::new().unwrap();
        let path = write_upload(dir.path(), None, b"foobar");
        let manifest = FsManifestStore.parse(&path).unwrap();
        match FsManifestStore.verify(&manifest).unwrap_err() {
            VerifyError::SizeMismatch {
                name,
                expected,
                actual,
            } => {
                assert_eq!(name, "foo_1.0.deb");
                assert_eq!(expected, 3);
                assert_eq!(actual, 6);
            }
            other => panic!("expected SizeMismatch, got {other:?}"),
        }
    }

    #[test]
    fn verify_detects_checksum_mismatch() {
        let dir = TempDir::new().unwrap();
        let path = write_upload(dir.path(), Some(FOO_SHA256), b"bar");
        let manifest = FsManifestStore.parse(&path).unwrap();
        let err = FsManifestStore.verify(&manifest).unwrap_err();
        assert!(matches!(err, VerifyError::ChecksumMismatch(ref n) if n == "foo_1.0.deb"));
    }

    #[test]
    fn verify_detects_missing_artifact() {
        let dir = TempDir::new().unwrap();
        let path = write_upload(dir.path(), None, b"foo");
        fs::remove_file(dir.path().join("foo_1.0.deb")).unwrap();
        let manifest = FsManifestStore.parse(&path).unwrap();
        let err = FsManifestStore.verify(&manifest).unwrap_err();
        assert!(matches!(err, VerifyError::Missing(_)));
    }

    #[test]
    fn remove_deletes_manifest_and_artifacts() {
        let dir = TempDir::new().unwrap();
        let path = write_upload(dir.path(), None, b"foo");
        let manifest = FsManifestStore.parse(&path).unwrap();

        FsManifestStore.remove(&manifest).unwrap();
        assert!(!path.exists());
        assert!(!dir.path().join("foo_1.0.deb").exists());
    }

    #[test]
    fn remove_tolerates_absent_files() {
        let dir = TempDir::new().unwrap();
        let path = write_upload(dir.path(), None, b"foo");
        let manifest = FsManifestStore.parse(&path).unwrap();
        fs::remove_file(dir.path().join("foo_1.0.deb")).unwrap();

        FsManifestStore.remove(&manifest).unwrap();
        assert!(!path.exists());

        // Second removal is a no-op.
        FsManifestStore.remove(&manifest).unwrap();
    }

    #[test]
    fn discard_only_touches_manifest() {
        let dir = TempDir::new().unwrap();
        let path = write_upload(dir.path(), None, b"foo");

        FsManifestStore.discard(&path).unwrap();
        assert!(!path.exists());
        assert!(dir.path().join("foo_1.0.deb").exists());
        FsManifestStore.discard(&path).unwrap();
    }

    #[test]
    fn parse_missing_file_is_not_found() {
        let dir = TempDir::new().unwrap();
        let err = FsManifestStore
            .parse(&dir.path().join("gone.changes"))
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
