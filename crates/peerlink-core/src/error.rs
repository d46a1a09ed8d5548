//! Error types for `peerlink` core library.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias using `peerlink` Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for `peerlink` operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Config file could not be read
    #[error("Failed to read config file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Config file is not valid JSON for [`Config`](crate::config::Config)
    #[error("Failed to parse config file {path}: {source}")]
    ParseFile {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}
