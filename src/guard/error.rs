//! Error types for sandbox path resolution.

use std::path::PathBuf;

use thiserror::Error;

/// Errors produced while resolving a client path against the sandbox root.
#[derive(Debug, Error)]
pub enum GuardError {
    /// The configured sandbox root could not be resolved.
    #[error("invalid sandbox root {path}: {source}")]
    InvalidRoot {
        /// The root path as configured.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The configured sandbox root exists but is not a directory.
    #[error("sandbox root {path} is not a directory")]
    RootNotDirectory {
        /// The canonical root path.
        path: PathBuf,
    },

    /// The requested path escapes the sandbox or is malformed.
    #[error("forbidden path: {requested}")]
    Forbidden {
        /// The raw path as supplied by the client.
        requested: String,
    },

    /// The requested path passed validation but does not exist.
    #[error("not found: {requested}")]
    NotFound {
        /// The raw path as supplied by the client.
        requested: String,
    },

    /// Filesystem error while checking an already validated path.
    #[error("IO error resolving {path}: {source}")]
    Io {
        /// The absolute path being checked.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },
}

impl GuardError {
    /// Creates a forbidden-path error.
    pub fn forbidden(requested: impl Into<String>) -> Self {
        Self::Forbidden {
            requested: requested.into(),
        }
    }

    /// Creates a not-found error.
    pub fn not_found(requested: impl Into<String>) -> Self {
        Self::NotFound {
            requested: requested.into(),
        }
    }

    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
