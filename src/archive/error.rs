//! Error types for archive encoding.

use std::path::PathBuf;

use thiserror::Error;

use super::sink::SinkClosed;
use crate::walk::WalkEntryError;

/// Errors that end an archive stream.
///
/// [`RootUnreadable`](Self::RootUnreadable), [`SizeMismatch`](Self::SizeMismatch)
/// and [`Read`](Self::Read) are failures of the archive itself. [`SinkClosed`](Self::SinkClosed) and
/// [`Cancelled`](Self::Cancelled) mean the consumer went away.
#[derive(Debug, Error)]
pub enum EncodeError {
    /// The directory being archived could not be opened.
    #[error(transparent)]
    RootUnreadable(WalkEntryError),

    /// File length changed after its header was written.
    #[error(
        "size mismatch for {path}: header declared {expected} bytes, file {}",
        describe_actual(*expected, *actual)
    )]
    SizeMismatch {
        /// File being archived.
        path: PathBuf,
        /// Size written into the tar header.
        expected: u64,
        /// Bytes actually available (a value above `expected` means "at least").
        actual: u64,
    },

    /// Reading file contents failed after its header was written.
    #[error("read error in {path}: {source}")]
    Read {
        /// File being archived.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The output consumer disconnected.
    #[error(transparent)]
    SinkClosed(#[from] SinkClosed),

    /// The session was cancelled.
    #[error("archive session cancelled")]
    Cancelled,
}

impl EncodeError {
    /// Creates a size mismatch error.
    pub fn size_mismatch(path: impl Into<PathBuf>, expected: u64, actual: u64) -> Self {
        Self::SizeMismatch {
            path: path.into(),
            expected,
            actual,
        }
    }

    /// Creates a read error.
    pub fn read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Read {
            path: path.into(),
            source,
        }
    }

    /// True for errors that corrupt the archive, false for consumer-side
    /// teardown.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::RootUnreadable(_) | Self::SizeMismatch { .. } | Self::Read { .. }
        )
    }

    /// Kind of the IO error behind a failure to open the archive root.
    #[must_use]
    pub fn root_io_kind(&self) -> Option<std::io::ErrorKind> {
        match self {
            Self::RootUnreadable(e) => e.io_kind(),
            _ => None,
        }
    }
}

fn describe_actual(expected: u64, actual: u64) -> String {
    if actual > expected {
        format!("grew beyond {expected} bytes")
    } else {
        format!("ended after {actual} bytes")
    }
}
