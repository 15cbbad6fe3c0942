//! Upload manifest (`.changes` file) model and parser.
//!
//! A manifest is a single deb822 paragraph, optionally wrapped in a PGP
//! clear-signature. Parsing is a pure function of the file bytes; reading and
//! removing files on disk is left to the caller.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;

const PGP_SIGNED_HEADER: &str = "-----BEGIN PGP SIGNED MESSAGE-----";
const PGP_SIGNATURE_HEADER: &str = "-----BEGIN PGP SIGNATURE-----";

/// Errors produced while reading or parsing a manifest.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("manifest is not valid UTF-8")]
    Encoding,

    #[error("malformed PGP armor: {0}")]
    Armor(&'static str),

    #[error("malformed manifest at line {line}: {reason}")]
    Malformed { line: usize, reason: String },

    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("malformed {field} entry: {entry:?}")]
    BadFileEntry { field: &'static str, entry: String },

    #[error("manifest lists no files")]
    NoFiles,

    #[error("unsafe file name in manifest: {0:?}")]
    UnsafeFileName(String),

    #[error("{} is not inside the incoming directory of a watch target", .0.display())]
    Layout(PathBuf),
}

impl ParseError {
    /// True when the manifest file itself no longer exists.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ParseError::Io(e) if e.kind() == std::io::ErrorKind::NotFound)
    }
}

/// One artifact referenced by the manifest's `Files` field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManifestFile {
    pub name: String,
    pub size: u64,
    pub md5: String,
    pub section: String,
    pub priority: String,
    /// From `Checksums-Sha256`, when the manifest carries it.
    pub sha256: Option<String>,
}

/// Parsed upload descriptor.
#[derive(Debug, Clone, Serialize)]
pub struct Manifest {
    /// Where the manifest was read from.
    pub path: PathBuf,
    pub source: String,
    pub version: Option<String>,
    /// Target distribution (first token of the `Distribution` field).
    pub distribution: String,
    pub architecture: Vec<String>,
    pub maintainer: Option<String>,
    pub changed_by: Option<String>,
    pub files: Vec<ManifestFile>,
    /// Every field of the paragraph, keyed by the name as written.
    pub fields: BTreeMap<String, String>,
}

impl Manifest {
    /// Read and parse the manifest at `path`.
    pub fn from_file(path: &Path) -> Result<Self, ParseError> {
        let bytes = fs::read(path)?;
        Self::parse(path, &bytes)
    }

    /// Parse manifest bytes. `path` is recorded so artifacts can be located
    /// next to it.
    pub fn parse(path: impl Into<PathBuf>, bytes: &[u8]) -> Result<Self, ParseError> {
        let text = std::str::from_utf8(bytes).map_err(|_| ParseError::Encoding)?;
        let body = strip_clearsign(text)?;
        let fields = parse_paragraph(&body)?;

        let lookup = |name: &str| {
            fields
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v.as_str())
        };

        let source = first_token(lookup("Source")).ok_or(ParseError::MissingField("Source"))?;
        let distribution =
            first_token(lookup("Distribution")).ok_or(ParseError::MissingField("Distribution"))?;
        let mut files = parse_files(lookup("Files").ok_or(ParseError::MissingField("Files"))?)?;
        if files.is_empty() {
            return Err(ParseError::NoFiles);
        }
        if let Some(sums) = lookup("Checksums-Sha256") {
            attach_sha256(&mut files, sums)?;
        }

        Ok(Self {
            path: path.into(),
            source,
            version: first_token(lookup("Version")),
            distribution,
            architecture: lookup("Architecture")
                .map(|v| v.split_whitespace().map(str::to_string).collect())
                .unwrap_or_default(),
            maintainer: lookup("Maintainer").map(str::to_string),
            changed_by: lookup("Changed-By").map(str::to_string),
            files,
            fields,
        })
    }

    /// Case-insensitive field lookup.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Directory the manifest and its artifacts live in.
    pub fn directory(&self) -> &Path {
        self.path.parent().unwrap_or_else(|| Path::new("."))
    }

    /// Paths of every referenced artifact.
    pub fn artifact_paths(&self) -> impl Iterator<Item = PathBuf> + '_ {
        let dir = self.directory();
        self.files.iter().map(move |f| dir.join(&f.name))
    }
}

fn first_token(value: Option<&str>) -> Option<String> {
    value
        .and_then(|v| v.split_whitespace().next())
        .map(str::to_string)
}

/// Remove a PGP clear-signature wrapper, returning the signed text.
/// Unsigned input is returned unchanged.
fn strip_clearsign(text: &str) -> Result<String, ParseError> {
    let mut lines = text.lines().skip_while(|l| l.trim().is_empty()).peekable();
    if lines.peek().map(|l| l.trim_end()) != Some(PGP_SIGNED_HEADER) {
        return Ok(text.to_string());
    }
    lines.next();

    // Armor headers (`Hash: SHA256`) run up to the first blank line.
    loop {
        match lines.next() {
            Some(l) if l.trim().is_empty() => break,
            Some(_) => continue,
            None => return Err(ParseError::Armor("no blank line after armor headers")),
        }
    }

    let mut body = String::new();
    for line in lines {
        if line.trim_end() == PGP_SIGNATURE_HEADER {
            return Ok(body);
        }
        // Dash-escaped lines: "- -----" → "-----".
        let line = line.strip_prefix("- ").unwrap_or(line);
        body.push_str(line);
        body.push('\n');
    }
    Err(ParseError::Armor("signature block missing"))
}

/// Parse the first deb822 paragraph into a field map.
fn parse_paragraph(text: &str) -> Result<BTreeMap<String, String>, ParseError> {
    let mut fields: BTreeMap<String, String> = BTreeMap::new();
    let mut current: Option<String> = None;

    for (idx, raw) in text.lines().enumerate() {
        let line_no = idx + 1;
        if raw.starts_with('#') {
            continue;
        }
        if raw.trim().is_empty() {
            if current.is_some() {
                break;
            }
            continue;
        }

        if raw.starts_with(' ') || raw.starts_with('\t') {
            let name = current.as_ref().ok_or_else(|| ParseError::Malformed {
                line: line_no,
                reason: "continuation line without a field".to_string(),
            })?;
            let trimmed = raw.trim();
            let value = fields.entry(name.clone()).or_default();
            value.push('\n');
            if trimmed != "." {
                value.push_str(trimmed);
            }
            continue;
        }

        let (name, value) = raw.split_once(':').ok_or_else(|| ParseError::Malformed {
            line: line_no,
            reason: "expected `Field: value`".to_string(),
        })?;
        let name = name.trim();
        if name.is_empty() || name.contains(char::is_whitespace) {
            return Err(ParseError::Malformed {
                line: line_no,
                reason: format!("invalid field name {name:?}"),
            });
        }
        if fields.keys().any(|k| k.eq_ignore_ascii_case(name)) {
            return Err(ParseError::Malformed {
                line: line_no,
                reason: format!("duplicate field {name:?}"),
            });
        }
        fields.insert(name.to_string(), value.trim().to_string());
        current = Some(name.to_string());
    }

    Ok(fields)
}

/// `Files` entries: `md5 size section priority name`.
fn parse_files(value: &str) -> Result<Vec<ManifestFile>, ParseError> {
    let mut files = Vec::new();
    for entry in value.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let bad = || ParseError::BadFileEntry {
            field: "Files",
            entry: entry.to_string(),
        };
        let parts: Vec<&str> = entry.split_whitespace().collect();
        let [md5, size, section, priority, name] = parts.as_slice() else {
            return Err(bad());
        };
        files.push(ManifestFile {
            name: checked_name(name)?,
            size: size.parse().map_err(|_| bad())?,
            md5: md5.to_string(),
            section: section.to_string(),
            priority: priority.to_string(),
            sha256: None,
        });
    }
    Ok(files)
}

/// `Checksums-Sha256` entries: `sha256 size name`. Entries for files not in
/// `Files` are ignored.
fn attach_sha256(files: &mut [ManifestFile], value: &str) -> Result<(), ParseError> {
    for entry in value.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let parts: Vec<&str> = entry.split_whitespace().collect();
        let [sum, _size, name] = parts.as_slice() else {
            return Err(ParseError::BadFileEntry {
                field: "Checksums-Sha256",
                entry: entry.to_string(),
            });
        };
        if let Some(file) = files.iter_mut().find(|f| f.name == *name) {
            file.sha256 = Some(sum.to_ascii_lowercase());
        }
    }
    Ok(())
}

/// Artifact names must stay inside the manifest's directory.
fn checked_name(name: &str) -> Result<String, ParseError> {
    if name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\\')
    {
        return Err(ParseError::UnsafeFileName(name.to_string()));
    }
    Ok(name.to_string())
}
