pub mod config;
pub mod error;
pub mod manifest;
pub mod upload;

pub use config::Config;
pub use error::*;
pub use manifest::{Manifest, ManifestFile, ParseError};
pub use upload::*;
