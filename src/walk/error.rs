//! Per-entry errors reported by the tree walker.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// A single entry that could not be walked.
///
/// The walker yields these in place of the entry and moves on. The one
/// exception is [`Root`](Self::Root): nothing can be walked without the root,
/// so the walk ends after it.
#[derive(Debug, Error)]
pub enum WalkEntryError {
    /// The walk root itself could not be opened.
    #[error("cannot open walk root {path}: {source}")]
    Root {
        /// The root directory.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Directory could not be opened or enumerated.
    #[error("cannot read directory {path}: {source}")]
    ReadDir {
        /// The directory that failed.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Entry type or metadata could not be read.
    #[error("cannot read metadata for {path}: {source}")]
    Metadata {
        /// The entry that failed.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Entry name is not valid UTF-8 and cannot be named in the archive.
    #[error("skipping entry with non-UTF-8 name: {}", path.display())]
    NonUtf8Name {
        /// The entry that was skipped.
        path: PathBuf,
    },
}

impl WalkEntryError {
    /// Creates a directory read error.
    pub fn read_dir(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::ReadDir {
            path: path.into(),
            source,
        }
    }

    /// Creates a root open error.
    pub fn root(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Root {
            path: path.into(),
            source,
        }
    }

    /// Creates a metadata error.
    pub fn metadata(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Metadata {
            path: path.into(),
            source,
        }
    }

    /// Creates a non-UTF-8 name error.
    pub fn non_utf8(path: impl Into<PathBuf>) -> Self {
        Self::NonUtf8Name { path: path.into() }
    }

    /// The filesystem path the error refers to.
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            Self::Root { path, .. }
            | Self::ReadDir { path, .. }
            | Self::Metadata { path, .. }
            | Self::NonUtf8Name { path } => path,
        }
    }

    /// True if the walk ended because its root could not be opened.
    #[must_use]
    pub fn is_root(&self) -> bool {
        matches!(self, Self::Root { .. })
    }

    /// Kind of the underlying IO error, if there is one.
    #[must_use]
    pub fn io_kind(&self) -> Option<std::io::ErrorKind> {
        match self {
            Self::Root { source, .. }
            | Self::ReadDir { source, .. }
            | Self::Metadata { source, .. } => Some(source.kind()),
            Self::NonUtf8Name { .. } => None,
        }
    }
}
