//! Directory-to-archive streaming.
//!
//! [`archive_directory`] is the single entry point used for directory
//! downloads. It wires the stages together:
//!
//! ```text
//! TreeWalker --pull--> ArchiveEncoder --bounded mpsc--> ArchiveStream --> HTTP body
//! ```
//!
//! - The encoder pulls the next entry only after the previous one is fully
//!   written, so the walker never runs ahead.
//! - The channel holds at most `channel_capacity` chunks; when the body stops
//!   polling, the encoder suspends on `send`.
//! - Dropping the [`ArchiveStream`] cancels the session token. The walker,
//!   the encoder and its open file all observe it within one read buffer.

mod session;
mod stream;

use std::path::PathBuf;

use tokio_util::sync::CancellationToken;

use crate::archive::DEFAULT_CHUNK_SIZE;
use crate::walk::WalkOptions;

pub use session::{SessionOutcome, SessionStats};
pub use stream::ArchiveStream;

/// Default number of chunks buffered between encoder and consumer.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 4;

/// Tuning for one archive session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineOptions {
    /// Size of chunks handed to the consumer and of file reads.
    pub chunk_size: usize,
    /// Chunks buffered between encoder and consumer.
    pub channel_capacity: usize,
    /// Walker options.
    pub walk: WalkOptions,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            walk: WalkOptions::default(),
        }
    }
}

/// Starts streaming `root` as a tar archive.
///
/// Must be called from within a Tokio runtime. The session runs until the
/// archive is complete, `cancel` fires, or the returned stream is dropped.
pub fn archive_directory(
    root: impl Into<PathBuf>,
    cancel: CancellationToken,
    options: PipelineOptions,
) -> ArchiveStream {
    session::StreamSession::start(root.into(), cancel, options)
}
