//! Minijinja template rendering for upload notifications.
//!
//! Each [`Template`] is loaded from `<dir>/<name>.txt` when a template
//! directory is configured, falling back to a built-in default. A leading
//! `Subject: ...` line becomes the message subject; the rest is the body.
//!
//! Templates are plain strings, so a fresh [`minijinja::Environment`] is
//! created per render call.

use std::collections::HashMap;
use std::path::Path;

use intake_core::{Template, UploadPayload};

use crate::traits::NotifyError;

const DEFAULT_ACCEPTED: &str = "\
Subject: Accepted {{ manifest.source }}{% if manifest.version %} {{ manifest.version }}{% endif %} ({{ manifest.distribution }})

{{ manifest.source }}{% if manifest.version %} {{ manifest.version }}{% endif %} was included into {{ repository.location }}.

Distribution: {{ manifest.distribution }}
Repository:   {{ repository.root }}
Files:
{% for f in manifest.files %}  {{ f.name }} ({{ f.size }} bytes)
{% endfor %}";

const DEFAULT_REJECTED: &str = "\
Subject: Rejected {% if manifest %}{{ manifest.source }}{% if manifest.version %} {{ manifest.version }}{% endif %}{% else %}{{ manifest_path | basename }}{% endif %}

{% if manifest %}{{ manifest.source }}{% if manifest.version %} {{ manifest.version }}{% endif %} for {{ manifest.distribution }}{% else %}{{ manifest_path | basename }}{% endif %} was rejected.

Reason: {{ reason }}
Repository: {{ repository.root }}
";

/// Context handed to templates: the upload payload plus a timestamp.
#[derive(Debug, serde::Serialize)]
struct RenderContext<'a> {
    #[serde(flatten)]
    payload: &'a UploadPayload,
    template: &'static str,
    /// Current timestamp in ISO 8601 format.
    now: String,
}

/// Rendered subject and body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedMessage {
    pub subject: String,
    pub body: String,
}

/// Renders the accepted/rejected templates.
#[derive(Debug, Clone)]
pub struct TemplateRenderer {
    sources: HashMap<Template, String>,
}

impl TemplateRenderer {
    /// Renderer using only the built-in templates.
    pub fn builtin() -> Self {
        let sources = HashMap::from([
            (Template::Accepted, DEFAULT_ACCEPTED.to_string()),
            (Template::Rejected, DEFAULT_REJECTED.to_string()),
        ]);
        Self { sources }
    }

    /// Load templates from `dir` (if given), keeping built-ins for missing files.
    ///
    /// # Errors
    ///
    /// Returns [`NotifyError::Io`] if the directory does not exist or a
    /// template file cannot be read, and [`NotifyError::Template`] if a
    /// template has syntax errors.
    pub fn load(dir: Option<&Path>) -> Result<Self, NotifyError> {
        let mut renderer = Self::builtin();
        let Some(dir) = dir else {
            return Ok(renderer);
        };

        if !dir.is_dir() {
            return Err(NotifyError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("template directory {} not found", dir.display()),
            )));
        }

        for template in Template::ALL {
            let path = dir.join(format!("{}.txt", template.name()));
            if !path.exists() {
                tracing::warn!(
                    template = %template,
                    path = %path.display(),
                    "template file missing, using built-in default"
                );
                continue;
            }
            let source = std::fs::read_to_string(&path)?;
            Self::validate(&source)?;
            tracing::info!(template = %template, path = %path.display(), "loaded template");
            renderer.sources.insert(template, source);
        }

        Ok(renderer)
    }

    /// Build a configured minijinja environment with custom filters and globals.
    fn build_env() -> minijinja::Environment<'static> {
        let mut env = minijinja::Environment::new();
        env.add_filter("basename", basename_filter);
        env.add_function("env", env_function);
        env
    }

    /// Render `template` against `payload`.
    ///
    /// # Errors
    ///
    /// Returns [`NotifyError::Template`] if rendering fails.
    pub fn render(
        &self,
        template: Template,
        payload: &UploadPayload,
    ) -> Result<RenderedMessage, NotifyError> {
        let source = self
            .sources
            .get(&template)
            .ok_or_else(|| NotifyError::Template(format!("no template named {template}")))?;

        let ctx = RenderContext {
            payload,
            template: template.name(),
            now: chrono::Utc::now().to_rfc3339(),
        };

        let rendered = Self::build_env()
            .render_str(source, &ctx)
            .map_err(|e| NotifyError::Template(e.to_string()))?;

        Ok(split_subject(&rendered, template))
    }

    /// Validate that a template string parses without errors.
    pub fn validate(template_str: &str) -> Result<(), NotifyError> {
        let env = Self::build_env();
        env.template_from_str(template_str)
            .map_err(|e| NotifyError::Template(e.to_string()))?;
        Ok(())
    }
}

impl Default for TemplateRenderer {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Peel a leading `Subject:` line off the rendered text.
fn split_subject(rendered: &str, template: Template) -> RenderedMessage {
    let trimmed = rendered.trim_start_matches('\n');
    if let Some(rest) = trimmed.strip_prefix("Subject:") {
        let (subject, body) = rest.split_once('\n').unwrap_or((rest, ""));
        return RenderedMessage {
            subject: subject.trim().to_string(),
            body: body.trim_start_matches('\n').to_string(),
        };
    }
    RenderedMessage {
        subject: format!("Upload {template}"),
        body: rendered.to_string(),
    }
}

/// Custom filter: last path component.
fn basename_filter(value: String) -> String {
    Path::new(&value)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or(value)
}

/// Global function: read an environment variable by name.
///
/// Returns the variable value, or an empty string if not found
/// (with a warning logged via tracing).
fn env_function(name: String) -> String {
    match std::env::var(&name) {
        Ok(val) => val,
        Err(_) => {
            tracing::warn!(var = %name, "Environment variable not found, returning empty string");
            String::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use intake_core::{Manifest, RepositoryInfo};
    use std::path::PathBuf;

    const CHANGES: &str = "\
Source: foo
Version: 1.0
Distribution: unstable
Files:
 d3b07384d113edec49eaa6238ad5ff00 3 main/utils optional foo_1.0.deb
";

    fn payload(location: Option<&str>, reason: Option<&str>, parsed: bool) -> UploadPayload {
        let path = PathBuf::from("/repo/unstable/incoming/foo_1.0.changes");
        UploadPayload {
            manifest: parsed.then(|| Manifest::parse(&path, CHANGES.as_bytes()).unwrap()),
            manifest_path: path,
            repository: RepositoryInfo {
                root: PathBuf::from("/repo/unstable"),
                location: location.map(str::to_string),
            },
            reason: reason.map(str::to_string),
            from: "intake@example.com".to_string(),
            to: "admin@example.com".to_string(),
        }
    }

    #[test]
    fn builtin_accepted() {
        let renderer = TemplateRenderer::builtin();
        let msg = renderer
            .render(Template::Accepted, &payload(Some("pool/main/f/foo"), None, true))
            .unwrap();
        assert_eq!(msg.subject, "Accepted foo 1.0 (unstable)");
        assert!(msg.body.contains("included into pool/main/f/foo"), "{}", msg.body);
        assert!(msg.body.contains("foo_1.0.deb (3 bytes)"), "{}", msg.body);
    }

    #[test]
    fn builtin_templates_omit_missing_version() {
        let path = PathBuf::from("/repo/unstable/incoming/foo.changes");
        let unversioned = CHANGES.replace("Version: 1.0\n", "");
        let mut payload = payload(Some("pool/main/f/foo"), Some("frozen"), false);
        payload.manifest = Some(Manifest::parse(&path, unversioned.as_bytes()).unwrap());
        let renderer = TemplateRenderer::builtin();

        let accepted = renderer.render(Template::Accepted, &payload).unwrap();
        assert_eq!(accepted.subject, "Accepted foo (unstable)");
        assert!(accepted.body.starts_with("foo was included into"), "{}", accepted.body);

        let rejected = renderer.render(Template::Rejected, &payload).unwrap();
        assert_eq!(rejected.subject, "Rejected foo");
        assert!(rejected.body.contains("foo for unstable was rejected"), "{}", rejected.body);
        for msg in [&accepted, &rejected] {
            assert!(!msg.subject.contains("none"), "{}", msg.subject);
            assert!(!msg.body.contains("none"), "{}", msg.body);
        }
    }

    #[test]
    fn builtin_rejected_carries_reason() {
        let renderer = TemplateRenderer::builtin();
        let msg = renderer
            .render(Template::Rejected, &payload(None, Some("unknown distribution"), true))
            .unwrap();
        assert_eq!(msg.subject, "Rejected foo 1.0");
        assert!(msg.body.contains("Reason: unknown distribution"), "{}", msg.body);
    }

    #[test]
    fn builtin_rejected_without_manifest() {
        let renderer = TemplateRenderer::builtin();
        let msg = renderer
            .render(Template::Rejected, &payload(None, Some("missing required field: Source"), false))
            .unwrap();
        assert_eq!(msg.subject, "Rejected foo_1.0.changes");
        assert!(msg.body.contains("missing required field: Source"));
    }

    #[test]
    fn load_from_directory_overrides_builtin() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("accepted.txt"),
            "Subject: [{{ template }}] {{ manifest.source }}\n\nto={{ to }} from={{ from }}\n",
        )
        .unwrap();

        let renderer = TemplateRenderer::load(Some(dir.path())).unwrap();
        let msg = renderer
            .render(Template::Accepted, &payload(Some("pool/main/f/foo"), None, true))
            .unwrap();
        assert_eq!(msg.subject, "[accepted] foo");
        assert_eq!(msg.body.trim(), "to=admin@example.com from=intake@example.com");

        // rejected.txt absent: built-in remains.
        let msg = renderer
            .render(Template::Rejected, &payload(None, Some("boom"), true))
            .unwrap();
        assert!(msg.subject.starts_with("Rejected"));
    }

    #[test]
    fn template_without_subject_line() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("rejected.txt"), "{{ reason }}").unwrap();
        let renderer = TemplateRenderer::load(Some(dir.path())).unwrap();
        let msg = renderer
            .render(Template::Rejected, &payload(None, Some("boom"), true))
            .unwrap();
        assert_eq!(msg.subject, "Upload rejected");
        assert_eq!(msg.body, "boom");
    }

    #[test]
    fn load_rejects_invalid_template() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("accepted.txt"), "{{ unclosed").unwrap();
        let err = TemplateRenderer::load(Some(dir.path())).unwrap_err();
        assert!(matches!(err, NotifyError::Template(_)));
    }

    #[test]
    fn load_missing_directory() {
        let err = TemplateRenderer::load(Some(Path::new("/definitely/not/here"))).unwrap_err();
        assert!(matches!(err, NotifyError::Io(_)));
    }

    #[test]
    fn env_missing_returns_empty() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("accepted.txt"),
            "[{{ env('DEFINITELY_NOT_SET_XYZ') }}]",
        )
        .unwrap();
        let renderer = TemplateRenderer::load(Some(dir.path())).unwrap();
        let msg = renderer
            .render(Template::Accepted, &payload(Some("x"), None, true))
            .unwrap();
        assert_eq!(msg.body, "[]");
    }
}
