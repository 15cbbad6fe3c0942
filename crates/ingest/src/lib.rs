//! Event-driven upload ingestion.
//!
//! - [`watcher`]: discovers watch targets and subscribes to their `incoming` directories
//! - [`dispatcher`]: filters filesystem events and spawns one workflow per finished manifest
//! - [`workflow`]: parse → include → cleanup → notify for a single upload
//! - [`store`] / [`gateway`]: manifest file handling and repository inclusion

pub mod dispatcher;
pub mod error;
pub mod gateway;
pub mod locks;
pub mod store;
pub mod watcher;
pub mod workflow;

pub use dispatcher::{is_manifest_ready, DispatchSummary, IngestionDispatcher};
pub use error::{IncludeError, RemoveError, VerifyError, WatchError};
pub use gateway::{RepositoryGateway, RepreproGateway};
pub use locks::RepositoryLocks;
pub use store::{FsManifestStore, ManifestStore};
pub use watcher::{discover_targets, DirectoryWatcher, ManifestEvent, Subscription};
pub use workflow::IngestionWorkflow;
