//! Dirserve Core Library
//!
//! Serves a directory tree over HTTP. Directories can be browsed or
//! downloaded as a single tar archive that is generated on the fly,
//! streamed with backpressure, and torn down as soon as the client goes
//! away.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`guard`] - Sandbox path resolution (rejects traversal before any IO)
//! - [`walk`] - Lazy, cancellable directory traversal
//! - [`archive`] - Single-pass tar encoding into a chunked sink
//! - [`pipeline`] - Per-request archive sessions (walker → encoder → stream)
//! - [`serve`] - HTTP dispatcher, listings and response headers
//! - [`config`] - Optional configuration file

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod archive;
pub mod config;
pub mod guard;
pub mod pipeline;
pub mod serve;
pub mod walk;

// Re-export commonly used types
pub use archive::{ArchiveEncoder, ArchiveSink, DEFAULT_CHUNK_SIZE, EncodeError, EncodeStats};
pub use config::{ConfigError, FileConfig, LoadedConfig, VerbositySetting};
pub use guard::{GuardError, ResolvedPath, SandboxRoot};
pub use pipeline::{
    ArchiveStream, DEFAULT_CHANNEL_CAPACITY, PipelineOptions, SessionOutcome, SessionStats,
    archive_directory,
};
pub use serve::{AppState, ServeError};
pub use walk::{FileEntry, TreeWalker, WalkEntryError, WalkOptions};
