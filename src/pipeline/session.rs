//! Per-request archive session.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span};

use super::PipelineOptions;
use super::stream::ArchiveStream;
use crate::archive::{ArchiveEncoder, ArchiveSink, EncodeError, EncodeStats, SinkClosed};
use crate::walk::TreeWalker;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) type Chunk = Result<Bytes, EncodeError>;

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// The whole archive, trailer included, was handed to the consumer.
    Completed,
    /// The consumer disconnected or the session token was cancelled.
    Cancelled,
    /// A file changed or failed after its header was written.
    Failed,
}

/// Observable state of one session.
#[derive(Debug)]
pub struct SessionStats {
    id: u64,
    encode: Arc<EncodeStats>,
    outcome: OnceLock<SessionOutcome>,
    finished: watch::Sender<bool>,
}

impl SessionStats {
    pub(crate) fn new(id: u64) -> Self {
        Self {
            id,
            encode: Arc::new(EncodeStats::new()),
            outcome: OnceLock::new(),
            finished: watch::Sender::new(false),
        }
    }

    /// Process-unique session id, also recorded on the session's span.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Encoder counters.
    #[must_use]
    pub fn encode(&self) -> &EncodeStats {
        &self.encode
    }

    /// Outcome, once the session has ended.
    #[must_use]
    pub fn outcome(&self) -> Option<SessionOutcome> {
        self.outcome.get().copied()
    }

    /// True once the session task has released all of its resources.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        *self.finished.borrow()
    }

    /// Waits until the session task has ended.
    pub async fn wait_finished(&self) {
        let mut rx = self.finished.subscribe();
        // The sender lives in `self`, so this cannot observe a closed channel.
        let _ = rx.wait_for(|done| *done).await;
    }

    pub(crate) fn finish(&self, outcome: SessionOutcome) {
        let _ = self.outcome.set(outcome);
        self.finished.send_replace(true);
    }
}

/// Marks the session failed if its task unwinds before recording an outcome.
///
/// Declared as a local of [`StreamSession::run`], so it drops before the
/// session's sender and the consumer still sees the outcome first.
struct FinishGuard {
    stats: Arc<SessionStats>,
}

impl Drop for FinishGuard {
    fn drop(&mut self) {
        if !self.stats.is_finished() {
            error!(session = self.stats.id(), "archive session ended without an outcome");
            self.stats.finish(SessionOutcome::Failed);
        }
    }
}

/// Sink that forwards chunks over a bounded channel.
///
/// `send` waits while the channel is full, which is where backpressure
/// from the HTTP body reaches the encoder.
struct ChannelSink {
    tx: mpsc::Sender<Chunk>,
}

#[async_trait]
impl ArchiveSink for ChannelSink {
    async fn send(&mut self, chunk: Bytes) -> Result<(), SinkClosed> {
        self.tx.send(Ok(chunk)).await.map_err(|_| SinkClosed)
    }
}

/// One walk + encode operation bound to one consumer.
pub(crate) struct StreamSession {
    root: PathBuf,
    cancel: CancellationToken,
    options: PipelineOptions,
    tx: mpsc::Sender<Chunk>,
    stats: Arc<SessionStats>,
}

impl StreamSession {
    /// Spawns the session task and returns the consumer half.
    pub(crate) fn start(
        root: PathBuf,
        cancel: CancellationToken,
        options: PipelineOptions,
    ) -> ArchiveStream {
        let id = NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(options.channel_capacity.max(1));
        let stats = Arc::new(SessionStats::new(id));

        let span = info_span!("archive_session", session = id, root = %root.display());
        let session = Self {
            root,
            cancel: cancel.clone(),
            options,
            tx,
            stats: Arc::clone(&stats),
        };
        tokio::spawn(session.run().instrument(span));

        ArchiveStream::new(rx, stats, cancel.drop_guard())
    }

    async fn run(self) {
        let _finish = FinishGuard {
            stats: Arc::clone(&self.stats),
        };
        debug!(
            chunk_size = self.options.chunk_size,
            channel_capacity = self.options.channel_capacity,
            "archive session started"
        );

        let walker = TreeWalker::new(&self.root, self.cancel.clone(), self.options.walk);
        let sink = ChannelSink {
            tx: self.tx.clone(),
        };
        let mut encoder = ArchiveEncoder::new(sink, self.cancel.clone(), self.options.chunk_size)
            .with_stats(Arc::clone(&self.stats.encode));
        let result = encoder.encode(walker.into_stream()).await;
        drop(encoder);

        let encode = self.stats.encode();
        let outcome = match result {
            Ok(()) => {
                info!(
                    files = encode.files_archived(),
                    skipped = encode.entries_skipped(),
                    bytes = encode.bytes_emitted(),
                    "archive complete"
                );
                SessionOutcome::Completed
            }
            Err(e) if e.is_fatal() => {
                error!(
                    error = %e,
                    files = encode.files_archived(),
                    bytes = encode.bytes_emitted(),
                    "archive aborted"
                );
                tokio::select! {
                    biased;
                    () = self.cancel.cancelled() => {}
                    _ = self.tx.send(Err(e)) => {}
                }
                SessionOutcome::Failed
            }
            Err(_) => {
                debug!(
                    files = encode.files_archived(),
                    bytes = encode.bytes_emitted(),
                    "archive consumer went away"
                );
                SessionOutcome::Cancelled
            }
        };

        // Outcome first: the consumer reads it when the channel closes.
        self.stats.finish(outcome);
        drop(self.tx);
    }
}
