use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};

use bytes::Bytes;
use futures_util::Stream;
use tokio::sync::mpsc;
use tokio_util::sync::DropGuard;

use super::session::{Chunk, SessionOutcome, SessionStats};
use crate::archive::EncodeError;

/// Consumer half of an archive session.
///
/// Yields the tar stream chunk by chunk. Dropping it cancels the session,
/// which stops the walker and closes any open file.
///
/// The stream ends with `None` only after the trailer of a completed archive.
/// A session that stops early ends with one `Err` item, so an HTTP body
/// built from it aborts the connection instead of ending cleanly.
pub struct ArchiveStream {
    rx: mpsc::Receiver<Chunk>,
    pending: Option<Bytes>,
    terminated: bool,
    stats: Arc<SessionStats>,
    _cancel_on_drop: DropGuard,
}

impl ArchiveStream {
    pub(crate) fn new(rx: mpsc::Receiver<Chunk>, stats: Arc<SessionStats>, guard: DropGuard) -> Self {
        Self {
            rx,
            pending: None,
            terminated: false,
            stats,
            _cancel_on_drop: guard,
        }
    }

    /// Waits for the first chunk without consuming it.
    ///
    /// Lets the caller pick a response status before committing to a body:
    /// if the session fails before producing any bytes, the error comes back
    /// here instead of through the stream.
    ///
    /// # Errors
    ///
    /// Returns the session's error if it failed before its first chunk, or
    /// [`EncodeError::Cancelled`] if it ended without output.
    pub async fn prime(&mut self) -> Result<(), EncodeError> {
        if self.pending.is_some() {
            return Ok(());
        }
        match self.rx.recv().await {
            Some(Ok(chunk)) => {
                self.pending = Some(chunk);
                Ok(())
            }
            Some(Err(e)) => {
                self.terminated = true;
                Err(e)
            }
            None => {
                self.terminated = true;
                Err(EncodeError::Cancelled)
            }
        }
    }

    /// Shared session state.
    #[must_use]
    pub fn stats(&self) -> Arc<SessionStats> {
        Arc::clone(&self.stats)
    }
}

impl Stream for ArchiveStream {
    type Item = Result<Bytes, EncodeError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if let Some(chunk) = this.pending.take() {
            return Poll::Ready(Some(Ok(chunk)));
        }
        if this.terminated {
            return Poll::Ready(None);
        }
        match ready!(this.rx.poll_recv(cx)) {
            Some(Ok(chunk)) => Poll::Ready(Some(Ok(chunk))),
            Some(Err(e)) => {
                this.terminated = true;
                Poll::Ready(Some(Err(e)))
            }
            None => {
                this.terminated = true;
                if this.stats.outcome() == Some(SessionOutcome::Completed) {
                    Poll::Ready(None)
                } else {
                    Poll::Ready(Some(Err(EncodeError::Cancelled)))
                }
            }
        }
    }
}

impl std::fmt::Debug for ArchiveStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveStream")
            .field("session", &self.stats.id())
            .field("primed", &self.pending.is_some())
            .field("terminated", &self.terminated)
            .finish_non_exhaustive()
    }
}
