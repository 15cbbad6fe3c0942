use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Profile-aware key lookup: tries `{PROFILE}_{KEY}` first, falls back to `{KEY}`.
struct Lookup<'a, F: Fn(&str) -> Option<String>> {
    profile: &'a str,
    source: F,
}

impl<F: Fn(&str) -> Option<String>> Lookup<'_, F> {
    fn opt(&self, key: &str) -> Option<String> {
        if !self.profile.is_empty() {
            let prefixed = format!("{}_{}", self.profile, key);
            if let Some(v) = (self.source)(&prefixed).filter(|s| !s.is_empty()) {
                return Some(v);
            }
        }
        (self.source)(key).filter(|s| !s.is_empty())
    }

    fn or(&self, key: &str, default: &str) -> String {
        self.opt(key).unwrap_or_else(|| default.to_string())
    }

    fn parsed<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        self.opt(key).and_then(|v| v.parse().ok()).unwrap_or(default)
    }

    fn flag(&self, key: &str, default: bool) -> bool {
        match self.opt(key) {
            Some(v) => matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
            None => default,
        }
    }
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub watch: WatchConfig,
    pub ingest: IngestConfig,
    pub notify: NotifyConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `INTAKE_PROFILE`. When set (e.g. `PROD`), every key
    /// is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_opt("INTAKE_PROFILE").unwrap_or_default();
        Self::for_profile(&profile)
    }

    /// Build config from environment variables for an explicit profile.
    pub fn for_profile(profile: &str) -> Self {
        Self::from_lookup(profile, env_opt)
    }

    /// Build config from an arbitrary key source. Used by `from_env` and tests.
    pub fn from_lookup<F>(profile: &str, source: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let p = profile.to_uppercase();
        let lookup = Lookup {
            profile: &p,
            source,
        };
        let watch = WatchConfig::from_lookup(&lookup);
        let ingest = IngestConfig::from_lookup(&lookup, &watch.root);
        let notify = NotifyConfig::from_lookup(&lookup);
        Self {
            profile: p.clone(),
            watch,
            ingest,
            notify,
        }
    }

    /// Apply command-line overrides for the watch root, template directory and
    /// administrator address.
    ///
    /// The private directory follows a root override unless it was set explicitly.
    pub fn with_overrides(
        mut self,
        root: Option<PathBuf>,
        templates: Option<PathBuf>,
        administrator: Option<String>,
    ) -> Self {
        if let Some(root) = root {
            if self.ingest.private_dir == default_private_dir(&self.watch.root) {
                self.ingest.private_dir = default_private_dir(&root);
            }
            self.watch.root = root;
        }
        if templates.is_some() {
            self.notify.templates_dir = templates;
        }
        if administrator.is_some() {
            self.notify.administrator = administrator;
        }
        self
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.watch.manifest_suffix.is_empty() {
            return Err(ConfigError::Invalid {
                key: "INTAKE_MANIFEST_SUFFIX",
                reason: "must not be empty".to_string(),
            });
        }
        if self.ingest.max_concurrent_uploads == 0 {
            return Err(ConfigError::Invalid {
                key: "INTAKE_MAX_CONCURRENT",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.ingest.include_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "INTAKE_INCLUDE_TIMEOUT_SECS",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.notify.queue_capacity == 0 {
            return Err(ConfigError::Invalid {
                key: "INTAKE_NOTIFY_QUEUE",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a redacted summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!(
            "  watch:   root={}, suffix={}, sweep={} (grace {}s)",
            self.watch.root.display(),
            self.watch.manifest_suffix,
            self.watch.sweep_existing,
            self.watch.sweep_grace_secs
        );
        tracing::info!(
            "  ingest:  private={}, max_concurrent={}, timeout={}s, reprepro={}",
            self.ingest.private_dir.display(),
            self.ingest.max_concurrent_uploads,
            self.ingest.include_timeout_secs,
            self.ingest.reprepro
        );
        tracing::info!(
            "  notify:  admin={}, templates={}, smtp={}",
            self.notify.administrator.as_deref().unwrap_or("(none)"),
            self.notify
                .templates_dir
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "(built-in)".to_string()),
            self.notify.smtp.as_ref().map(|s| s.host.as_str()).unwrap_or("(log only)")
        );
    }
}

fn default_private_dir(root: &Path) -> PathBuf {
    root.join("..").join("private")
}

// ── Watch ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Directory whose immediate children are watch targets.
    pub root: PathBuf,
    /// File name suffix identifying an upload manifest.
    pub manifest_suffix: String,
    /// Dispatch manifests already present in `incoming` at startup.
    pub sweep_existing: bool,
    /// The sweep skips manifests modified this recently; their writer may
    /// still be busy and a close-write will announce them.
    pub sweep_grace_secs: u64,
}

impl WatchConfig {
    fn from_lookup<F: Fn(&str) -> Option<String>>(l: &Lookup<'_, F>) -> Self {
        Self {
            root: PathBuf::from(l.or("INTAKE_ROOT", ".")),
            manifest_suffix: l.or("INTAKE_MANIFEST_SUFFIX", ".changes"),
            sweep_existing: l.flag("INTAKE_SWEEP_EXISTING", false),
            sweep_grace_secs: l.parsed("INTAKE_SWEEP_GRACE_SECS", 10),
        }
    }

    pub fn sweep_grace(&self) -> Duration {
        Duration::from_secs(self.sweep_grace_secs)
    }
}

// ── Ingest ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Private area holding one `<target>/.gnupg` signing home per repository.
    pub private_dir: PathBuf,
    pub max_concurrent_uploads: usize,
    pub include_timeout_secs: u64,
    /// Send a rejection notice when a manifest cannot be parsed.
    pub notify_parse_failures: bool,
    /// Repository tool executable.
    pub reprepro: String,
}

impl IngestConfig {
    fn from_lookup<F: Fn(&str) -> Option<String>>(l: &Lookup<'_, F>, root: &Path) -> Self {
        Self {
            private_dir: l
                .opt("INTAKE_PRIVATE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| default_private_dir(root)),
            max_concurrent_uploads: l.parsed("INTAKE_MAX_CONCURRENT", 4),
            include_timeout_secs: l.parsed("INTAKE_INCLUDE_TIMEOUT_SECS", 300),
            notify_parse_failures: l.flag("INTAKE_NOTIFY_PARSE_FAILURES", false),
            reprepro: l.or("INTAKE_REPREPRO", "reprepro"),
        }
    }

    pub fn include_timeout(&self) -> Duration {
        Duration::from_secs(self.include_timeout_secs)
    }
}

// ── Notify ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    /// Directory holding `accepted.txt` / `rejected.txt`; built-ins when unset.
    pub templates_dir: Option<PathBuf>,
    pub administrator: Option<String>,
    pub sender: String,
    pub queue_capacity: usize,
    /// SMTP delivery; notifications are only logged when unset.
    pub smtp: Option<SmtpConfig>,
}

impl NotifyConfig {
    fn from_lookup<F: Fn(&str) -> Option<String>>(l: &Lookup<'_, F>) -> Self {
        Self {
            templates_dir: l.opt("INTAKE_TEMPLATES").map(PathBuf::from),
            administrator: l.opt("INTAKE_ADMIN"),
            sender: l.or("INTAKE_SENDER", "intake@localhost"),
            queue_capacity: l.parsed("INTAKE_NOTIFY_QUEUE", 64),
            smtp: l.opt("INTAKE_SMTP_HOST").map(|host| SmtpConfig {
                host,
                port: l.opt("INTAKE_SMTP_PORT").and_then(|v| v.parse().ok()),
                tls: l.opt("INTAKE_SMTP_TLS").map(|_| l.flag("INTAKE_SMTP_TLS", true)),
            }),
        }
    }

    /// Recipients for administrator notices (empty when none is configured).
    pub fn recipients(&self) -> Vec<String> {
        self.administrator.iter().cloned().collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    pub port: Option<u16>,
    pub tls: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)], profile: &str) -> Config {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(profile, move |key| vars.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let config = config_from(&[], "");
        assert_eq!(config.watch.root, PathBuf::from("."));
        assert_eq!(config.watch.manifest_suffix, ".changes");
        assert_eq!(config.watch.sweep_grace(), Duration::from_secs(10));
        assert_eq!(config.ingest.private_dir, PathBuf::from("./../private"));
        assert_eq!(config.ingest.max_concurrent_uploads, 4);
        assert_eq!(config.ingest.include_timeout(), Duration::from_secs(300));
        assert!(!config.ingest.notify_parse_failures);
        assert!(config.notify.smtp.is_none());
        assert!(config.notify.recipients().is_empty());
        assert_eq!(config.profile_label(), "default");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn profile_prefix_wins() {
        let config = config_from(
            &[("INTAKE_ADMIN", "dev@example.com"), ("PROD_INTAKE_ADMIN", "ops@example.com")],
            "prod",
        );
        assert_eq!(config.profile, "PROD");
        assert_eq!(config.notify.administrator.as_deref(), Some("ops@example.com"));
    }

    #[test]
    fn profile_falls_back_to_plain_key() {
        let config = config_from(&[("INTAKE_ROOT", "/srv/repo")], "prod");
        assert_eq!(config.watch.root, PathBuf::from("/srv/repo"));
    }

    #[test]
    fn root_override_moves_default_private_dir() {
        let config = config_from(&[], "").with_overrides(
            Some(PathBuf::from("/srv/repo")),
            None,
            Some("admin@example.com".to_string()),
        );
        assert_eq!(config.watch.root, PathBuf::from("/srv/repo"));
        assert_eq!(config.ingest.private_dir, PathBuf::from("/srv/repo/../private"));
        assert_eq!(config.notify.recipients(), vec!["admin@example.com".to_string()]);
    }

    #[test]
    fn root_override_keeps_explicit_private_dir() {
        let config = config_from(&[("INTAKE_PRIVATE_DIR", "/etc/intake")], "")
            .with_overrides(Some(PathBuf::from("/srv/repo")), None, None);
        assert_eq!(config.ingest.private_dir, PathBuf::from("/etc/intake"));
    }

    #[test]
    fn flags_and_smtp() {
        let config = config_from(
            &[
                ("INTAKE_SWEEP_EXISTING", "yes"),
                ("INTAKE_SWEEP_GRACE_SECS", "0"),
                ("INTAKE_NOTIFY_PARSE_FAILURES", "1"),
                ("INTAKE_SMTP_HOST", "smtp.example.com"),
                ("INTAKE_SMTP_PORT", "465"),
                ("INTAKE_SMTP_TLS", "false"),
            ],
            "",
        );
        assert!(config.watch.sweep_existing);
        assert_eq!(config.watch.sweep_grace_secs, 0);
        assert!(config.ingest.notify_parse_failures);
        let smtp = config.notify.smtp.expect("smtp configured");
        assert_eq!(smtp.host, "smtp.example.com");
        assert_eq!(smtp.port, Some(465));
        assert_eq!(smtp.tls, Some(false));
    }

    #[test]
    fn validate_rejects_zero_concurrency() {
        let config = config_from(&[("INTAKE_MAX_CONCURRENT", "0")], "");
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("INTAKE_MAX_CONCURRENT"), "got: {err}");
    }

    #[test]
    fn unparsable_number_uses_default() {
        let config = config_from(&[("INTAKE_INCLUDE_TIMEOUT_SECS", "soon")], "");
        assert_eq!(config.ingest.include_timeout_secs, 300);
    }
}
