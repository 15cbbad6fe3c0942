//! intake-worker: watches incoming directories and ingests finished uploads.
//!
//! Layout: `<root>/<distribution>/incoming/*.changes`. Each manifest that is
//! closed after writing is verified, included via reprepro, removed, and
//! reported to the administrator.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use intake_core::Config;
use intake_ingest::{
    DirectoryWatcher, FsManifestStore, IngestionDispatcher, IngestionWorkflow, RepreproGateway,
};
use intake_notify::{
    EmailNotifier, LogNotifier, NotificationSink, Notifier, QueuedSink, TemplateRenderer,
};

// ── CLI ─────────────────────────────────────────────────────────────

/// Upload watcher that ingests completed manifests into their repository.
#[derive(Parser, Debug)]
#[command(name = "intake-worker", version, about)]
struct Cli {
    /// Configuration profile; keys are looked up as `{PROFILE}_{KEY}` first.
    #[arg(long, env = "INTAKE_PROFILE", default_value = "")]
    profile: String,

    /// Watch root (overrides INTAKE_ROOT).
    #[arg(long)]
    root: Option<PathBuf>,

    /// Template directory holding accepted.txt / rejected.txt (overrides INTAKE_TEMPLATES).
    #[arg(long)]
    templates: Option<PathBuf>,

    /// Administrator address for notifications (overrides INTAKE_ADMIN).
    #[arg(long)]
    admin: Option<String>,

    /// Process manifests already present in incoming directories at startup.
    #[arg(long)]
    sweep: bool,
}

// ── main ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    intake_core::config::load_dotenv();
    let cli = Cli::parse();

    let mut config =
        Config::for_profile(&cli.profile).with_overrides(cli.root, cli.templates, cli.admin);
    config.watch.sweep_existing |= cli.sweep;
    config.validate()?;
    config.log_summary();
    let config = Arc::new(config);

    let (watcher, subscription) = DirectoryWatcher::start(&config.watch.root)
        .with_context(|| format!("failed to watch {}", config.watch.root.display()))?;

    let renderer = TemplateRenderer::load(config.notify.templates_dir.as_deref())
        .context("failed to load notification templates")?;
    let notifier: Arc<dyn Notifier> = match &config.notify.smtp {
        Some(smtp) => Arc::new(
            EmailNotifier::from_config(&smtp.host, smtp.port, smtp.tls, &config.notify.sender)
                .context("failed to configure SMTP notifier")?,
        ),
        None => {
            info!("no SMTP host configured, notifications go to the log");
            Arc::new(LogNotifier)
        }
    };
    info!(channel = notifier.channel_name(), "notifier ready");
    let (sink, notify_worker) =
        QueuedSink::spawn(config.notify.queue_capacity, renderer, notifier);
    let sink: Arc<dyn NotificationSink> = Arc::new(sink);

    let workflow = Arc::new(IngestionWorkflow::new(
        Arc::clone(&config),
        Arc::new(FsManifestStore),
        Arc::new(RepreproGateway::new(config.ingest.reprepro.clone())),
        sink,
    ));

    let mut dispatcher = IngestionDispatcher::new(workflow);
    if config.watch.sweep_existing {
        let swept = dispatcher.sweep(watcher.targets());
        info!(count = swept, "startup sweep dispatched");
    }

    info!(targets = watcher.targets().len(), "intake-worker started");
    let summary = dispatcher.run(subscription, os_signal()).await;
    drop(watcher);

    // Every sink handle is gone once the dispatcher has drained; the worker
    // finishes the queue and exits.
    if let Err(e) = notify_worker.await {
        tracing::error!(error = %e, "notification worker failed");
    }

    info!(
        dispatched = summary.dispatched,
        panicked = summary.panicked,
        "intake-worker exited cleanly"
    );
    Ok(())
}

/// Wait for SIGINT or SIGTERM (Unix) or Ctrl+C (cross-platform fallback).
async fn os_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigint = signal(SignalKind::interrupt()).expect("failed to register SIGINT");
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to register SIGTERM");
        tokio::select! {
            _ = sigint.recv() => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to listen for ctrl_c");
    }
}
