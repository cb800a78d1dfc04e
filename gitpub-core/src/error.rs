//! Error types for gitpub

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for gitpub operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while publishing
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Underlying git error
    #[error("Git error: {0}")]
    Git(#[from] git2::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Branch name rejected by git's ref-name rules
    #[error("Invalid branch name: {0}")]
    InvalidBranch(String),

    /// Fetch from a remote failed
    #[error("Fetch from '{remote}' failed: {source}")]
    Fetch {
        /// Remote name the fetch targeted
        remote: String,
        /// Underlying git error
        #[source]
        source: git2::Error,
    },

    /// Push to a remote failed
    #[error("Push to '{remote}' failed: {source}")]
    Push {
        /// Remote name the push targeted
        remote: String,
        /// Underlying git error
        #[source]
        source: git2::Error,
    },

    /// A file could not be removed during cleanup
    #[error("Failed to remove {path}: {source}")]
    Clean {
        /// Path of the file that could not be removed
        path: PathBuf,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// Commit creation failed
    #[error("Commit failed: {0}")]
    Commit(String),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}
