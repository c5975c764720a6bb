//! Streaming tar encoding.
//!
//! The encoder turns a sequence of [`FileEntry`](crate::walk::FileEntry)
//! values into a tar byte stream, pushing fixed-size chunks into an
//! [`ArchiveSink`]. Nothing is compressed and nothing is buffered beyond
//! one chunk.
//!
//! # Failure asymmetry
//!
//! An entry that fails before its header is written (walk error, open
//! failure) is skipped. An entry that fails after its header is written
//! aborts the archive with [`EncodeError::SizeMismatch`] or
//! [`EncodeError::Read`], because a tar header cannot be revised once sent.

mod encoder;
mod error;
mod header;
mod sink;

pub use encoder::{Appended, ArchiveEncoder, DEFAULT_CHUNK_SIZE, EncodeStats};
pub use error::EncodeError;
pub use header::{BLOCK_SIZE, TRAILER};
pub use sink::{ArchiveSink, SinkClosed};
