//! Upload outcome notifications.
//!
//! This crate provides:
//! - `Notifier` trait for pluggable delivery channels
//! - SMTP email and log-only notifier implementations
//! - Minijinja rendering of the `accepted` / `rejected` templates
//! - `QueuedSink`, a fire-and-forget `NotificationSink` drained by a background worker
//!
//! The worker is internal and only built by `QueuedSink::spawn`:
//!
//! ```compile_fail
//! use intake_notify::sink::NotificationWorker;
//! ```

pub mod email;
pub mod log;
pub mod sink;
pub mod templating;
pub mod traits;

pub use email::EmailNotifier;
pub use log::LogNotifier;
pub use sink::{NotificationSink, QueuedSink};
pub use templating::TemplateRenderer;
pub use traits::{Notification, Notifier, NotifyError};
