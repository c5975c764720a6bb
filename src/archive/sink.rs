//! Output seam for the archive encoder.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

/// The consumer of archive bytes has gone away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("archive consumer disconnected")]
pub struct SinkClosed;

/// Destination for encoded archive chunks.
///
/// `send` may suspend while the consumer is not ready; that suspension is
/// what throttles the encoder and, through it, the walker.
#[async_trait]
pub trait ArchiveSink: Send {
    /// Hands one chunk to the consumer.
    ///
    /// # Errors
    ///
    /// Returns [`SinkClosed`] once the consumer can no longer accept data.
    async fn send(&mut self, chunk: Bytes) -> Result<(), SinkClosed>;
}

/// Collects the archive in memory. Used for tests and small archives.
#[async_trait]
impl ArchiveSink for Vec<u8> {
    async fn send(&mut self, chunk: Bytes) -> Result<(), SinkClosed> {
        self.extend_from_slice(&chunk);
        Ok(())
    }
}
