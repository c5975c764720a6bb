//! Single-pass tar encoder.

use std::fs::Metadata;
use std::path::Path;
use std::pin::pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::UNIX_EPOCH;

use bytes::{Bytes, BytesMut};
use futures_util::{Stream, StreamExt};
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace, warn};

use super::header::{self, BLOCK_SIZE, TRAILER};
use super::{ArchiveSink, EncodeError};
use crate::walk::{FileEntry, WalkEntryError, permission_bits};

/// Default size of chunks handed to the sink and of file read buffers (64 KiB).
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Counters shared between an encoder and whoever observes it.
///
/// Uses atomics so the session can read them while the encoder task runs.
#[derive(Debug, Default)]
pub struct EncodeStats {
    files_archived: AtomicUsize,
    entries_skipped: AtomicUsize,
    bytes_emitted: AtomicU64,
    open_files: AtomicUsize,
}

impl EncodeStats {
    /// Creates a zeroed stats tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Entries fully written to the archive.
    #[must_use]
    pub fn files_archived(&self) -> usize {
        self.files_archived.load(Ordering::SeqCst)
    }

    /// Entries skipped because of walk errors or failures before their header.
    #[must_use]
    pub fn entries_skipped(&self) -> usize {
        self.entries_skipped.load(Ordering::SeqCst)
    }

    /// Bytes accepted by the sink.
    #[must_use]
    pub fn bytes_emitted(&self) -> u64 {
        self.bytes_emitted.load(Ordering::SeqCst)
    }

    /// File handles currently held open by the encoder.
    #[must_use]
    pub fn open_files(&self) -> usize {
        self.open_files.load(Ordering::SeqCst)
    }

    fn increment_archived(&self) {
        self.files_archived.fetch_add(1, Ordering::SeqCst);
    }

    fn increment_skipped(&self) {
        self.entries_skipped.fetch_add(1, Ordering::SeqCst);
    }

    fn add_bytes(&self, len: usize) {
        self.bytes_emitted.fetch_add(len as u64, Ordering::SeqCst);
    }
}

/// Keeps [`EncodeStats::open_files`] in step with a file handle's lifetime.
struct OpenFile {
    file: File,
    stats: Arc<EncodeStats>,
}

impl OpenFile {
    fn new(file: File, stats: &Arc<EncodeStats>) -> Self {
        stats.open_files.fetch_add(1, Ordering::SeqCst);
        Self {
            file,
            stats: Arc::clone(stats),
        }
    }
}

impl Drop for OpenFile {
    fn drop(&mut self) {
        self.stats.open_files.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Outcome of appending a single entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Appended {
    /// Header and full contents were written.
    Written,
    /// The entry failed before its header was written and was left out.
    Skipped,
}

/// Writes tar entries into an [`ArchiveSink`].
///
/// For each file the encoder opens it, takes its size from the open handle,
/// writes the header, then copies exactly that many bytes. Once a header is
/// written its size cannot be revised, so any later shortfall, growth or
/// read error aborts the whole archive.
pub struct ArchiveEncoder<S> {
    sink: S,
    buffer: BytesMut,
    chunk_size: usize,
    cancel: CancellationToken,
    stats: Arc<EncodeStats>,
}

impl<S: ArchiveSink> ArchiveEncoder<S> {
    /// Creates an encoder. `chunk_size` is raised to at least one tar block.
    #[must_use]
    pub fn new(sink: S, cancel: CancellationToken, chunk_size: usize) -> Self {
        let chunk_size = chunk_size.max(BLOCK_SIZE);
        Self {
            sink,
            buffer: BytesMut::with_capacity(chunk_size),
            chunk_size,
            cancel,
            stats: Arc::new(EncodeStats::new()),
        }
    }

    /// Replaces the stats tracker with a shared one.
    #[must_use]
    pub fn with_stats(mut self, stats: Arc<EncodeStats>) -> Self {
        self.stats = stats;
        self
    }

    /// Returns the stats tracker.
    #[must_use]
    pub fn stats(&self) -> &Arc<EncodeStats> {
        &self.stats
    }

    /// Consumes the encoder and returns its sink.
    pub fn into_sink(self) -> S {
        self.sink
    }

    /// Encodes every entry of `entries`, then writes the trailer.
    ///
    /// Walk errors are logged and counted as skipped, except a root that
    /// cannot be opened, which ends the archive before anything is written.
    ///
    /// # Errors
    ///
    /// Returns the first error from [`append`](Self::append) or
    /// [`finish`](Self::finish).
    pub async fn encode<St>(&mut self, entries: St) -> Result<(), EncodeError>
    where
        St: Stream<Item = Result<FileEntry, WalkEntryError>> + Send,
    {
        let mut entries = pin!(entries);
        while let Some(item) = entries.next().await {
            if self.cancel.is_cancelled() {
                return Err(EncodeError::Cancelled);
            }
            match item {
                Ok(entry) => {
                    self.append(&entry).await?;
                }
                Err(e) if e.is_root() => return Err(EncodeError::RootUnreadable(e)),
                Err(e) => {
                    warn!(path = %e.path().display(), error = %e, "skipping unreadable entry");
                    self.stats.increment_skipped();
                }
            }
        }
        self.finish().await
    }

    /// Appends one entry.
    ///
    /// # Errors
    ///
    /// Returns [`EncodeError::SizeMismatch`] or [`EncodeError::Read`] if the
    /// file changed or failed after its header was written, and
    /// [`EncodeError::SinkClosed`] / [`EncodeError::Cancelled`] on teardown.
    #[instrument(level = "trace", skip(self, entry), fields(path = %entry.relative_path))]
    pub async fn append(&mut self, entry: &FileEntry) -> Result<Appended, EncodeError> {
        if entry.is_directory {
            return self.append_directory(entry).await;
        }

        let file = match File::open(&entry.absolute_path).await {
            Ok(file) => file,
            Err(e) => {
                warn!(path = %entry.absolute_path.display(), error = %e, "cannot open file, skipping");
                self.stats.increment_skipped();
                return Ok(Appended::Skipped);
            }
        };
        let mut file = OpenFile::new(file, &self.stats);

        let metadata = match file.file.metadata().await {
            Ok(metadata) if metadata.is_file() => metadata,
            Ok(_) => {
                debug!(path = %entry.absolute_path.display(), "no longer a regular file, skipping");
                self.stats.increment_skipped();
                return Ok(Appended::Skipped);
            }
            Err(e) => {
                warn!(path = %entry.absolute_path.display(), error = %e, "cannot stat open file, skipping");
                self.stats.increment_skipped();
                return Ok(Appended::Skipped);
            }
        };

        let size = metadata.len();
        if size != entry.size {
            debug!(
                path = %entry.absolute_path.display(),
                walked = entry.size,
                opened = size,
                "size changed since walk; using size at open"
            );
        }

        let blocks = match header::file_header(
            &entry.relative_path,
            size,
            permission_bits(&metadata),
            mtime_secs(&metadata),
        ) {
            Ok(blocks) => blocks,
            Err(e) => {
                warn!(name = %entry.relative_path, error = %e, "cannot encode tar header, skipping");
                self.stats.increment_skipped();
                return Ok(Appended::Skipped);
            }
        };

        // Header committed from here on.
        self.write(&blocks).await?;
        self.copy_body(&mut file.file, &entry.absolute_path, size)
            .await?;
        self.write_zeros(header::padding(size)).await?;
        drop(file);

        self.stats.increment_archived();
        trace!(size, "entry archived");
        Ok(Appended::Written)
    }

    /// Writes the end-of-archive trailer and flushes everything to the sink.
    ///
    /// # Errors
    ///
    /// Returns [`EncodeError::SinkClosed`] or [`EncodeError::Cancelled`] if
    /// the consumer went away.
    pub async fn finish(&mut self) -> Result<(), EncodeError> {
        self.write(&TRAILER).await?;
        self.flush().await
    }

    async fn append_directory(&mut self, entry: &FileEntry) -> Result<Appended, EncodeError> {
        let mtime = entry
            .modified
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_secs());
        match header::directory_header(&entry.relative_path, entry.mode, mtime) {
            Ok(blocks) => {
                self.write(&blocks).await?;
                self.stats.increment_archived();
                Ok(Appended::Written)
            }
            Err(e) => {
                warn!(name = %entry.relative_path, error = %e, "cannot encode tar header, skipping");
                self.stats.increment_skipped();
                Ok(Appended::Skipped)
            }
        }
    }

    /// Copies exactly `expected` bytes, then checks the file has no more.
    async fn copy_body(
        &mut self,
        file: &mut File,
        path: &Path,
        expected: u64,
    ) -> Result<(), EncodeError> {
        let mut remaining = expected;
        while remaining > 0 {
            let want = usize::try_from(remaining).map_or(self.chunk_size, |r| r.min(self.chunk_size));
            let start = self.buffer.len();
            self.buffer.resize(start + want, 0);

            let read = tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    self.buffer.truncate(start);
                    return Err(EncodeError::Cancelled);
                }
                read = file.read(&mut self.buffer[start..]) => read,
            };

            match read {
                Ok(0) => {
                    self.buffer.truncate(start);
                    return Err(EncodeError::size_mismatch(path, expected, expected - remaining));
                }
                Ok(n) => {
                    self.buffer.truncate(start + n);
                    remaining -= n as u64;
                }
                Err(e) => {
                    self.buffer.truncate(start);
                    return Err(EncodeError::read(path, e));
                }
            }

            if self.buffer.len() >= self.chunk_size {
                self.flush().await?;
            }
        }

        let mut probe = [0u8; 1];
        match file.read(&mut probe).await {
            Ok(0) => Ok(()),
            Ok(_) => Err(EncodeError::size_mismatch(path, expected, expected + 1)),
            Err(e) => Err(EncodeError::read(path, e)),
        }
    }

    async fn write(&mut self, bytes: &[u8]) -> Result<(), EncodeError> {
        self.buffer.extend_from_slice(bytes);
        if self.buffer.len() >= self.chunk_size {
            self.flush().await?;
        }
        Ok(())
    }

    async fn write_zeros(&mut self, len: usize) -> Result<(), EncodeError> {
        if len == 0 {
            return Ok(());
        }
        let start = self.buffer.len();
        self.buffer.resize(start + len, 0);
        if self.buffer.len() >= self.chunk_size {
            self.flush().await?;
        }
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), EncodeError> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let chunk: Bytes = self.buffer.split().freeze();
        let len = chunk.len();
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => return Err(EncodeError::Cancelled),
            sent = self.sink.send(chunk) => sent?,
        }
        self.stats.add_bytes(len);
        self.buffer.reserve(self.chunk_size);
        Ok(())
    }
}

fn mtime_secs(metadata: &Metadata) -> u64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map_or(0, |d| d.as_secs())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::BTreeMap;
    use std::fs;
    use std::io::Read;
    use std::path::PathBuf;

    use async_trait::async_trait;
    use tempfile::TempDir;

    use super::*;
    use crate::archive::SinkClosed;
    use crate::walk::{TreeWalker, WalkOptions};

    fn decode(bytes: &[u8]) -> BTreeMap<String, Vec<u8>> {
        let mut archive = tar::Archive::new(bytes);
        let mut out = BTreeMap::new();
        for entry in archive.entries().unwrap() {
            let mut entry = entry.unwrap();
            let path = entry.path().unwrap().to_string_lossy().into_owned();
            let mut contents = Vec::new();
            entry.read_to_end(&mut contents).unwrap();
            out.insert(path, contents);
        }
        out
    }

    async fn encode_dir(root: &Path, chunk_size: usize) -> (Result<(), EncodeError>, Vec<u8>) {
        let cancel = CancellationToken::new();
        let walker = TreeWalker::new(root, cancel.clone(), WalkOptions::default());
        let mut encoder = ArchiveEncoder::new(Vec::new(), cancel, chunk_size);
        let result = encoder.encode(walker.into_stream()).await;
        (result, encoder.into_sink())
    }

    fn entry_for(root: &Path, name: &str) -> FileEntry {
        let path = root.join(name);
        let metadata = fs::metadata(&path).unwrap();
        FileEntry::file(name.to_string(), path, &metadata)
    }

    /// Sink that runs a filesystem action after the first chunk it accepts.
    struct TamperingSink {
        out: Vec<u8>,
        target: PathBuf,
        action: fn(&Path),
        fired: bool,
    }

    #[async_trait]
    impl ArchiveSink for TamperingSink {
        async fn send(&mut self, chunk: Bytes) -> Result<(), SinkClosed> {
            self.out.extend_from_slice(&chunk);
            if !self.fired {
                self.fired = true;
                (self.action)(&self.target);
            }
            Ok(())
        }
    }

    /// Sink that refuses everything.
    struct ClosedSink;

    #[async_trait]
    impl ArchiveSink for ClosedSink {
        async fn send(&mut self, _chunk: Bytes) -> Result<(), SinkClosed> {
            Err(SinkClosed)
        }
    }

    #[tokio::test]
    async fn test_encode_round_trips_contents() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("sub/deeper")).unwrap();
        fs::write(temp.path().join("a.txt"), b"alpha").unwrap();
        fs::write(temp.path().join("sub/b.bin"), vec![7u8; 70_000]).unwrap();
        fs::write(temp.path().join("sub/deeper/c.txt"), b"").unwrap();

        let (result, bytes) = encode_dir(temp.path(), DEFAULT_CHUNK_SIZE).await;
        result.unwrap();
        assert_eq!(bytes.len() % BLOCK_SIZE, 0);

        let files = decode(&bytes);
        assert_eq!(files.len(), 3);
        assert_eq!(files["a.txt"], b"alpha");
        assert_eq!(files["sub/b.bin"], vec![7u8; 70_000]);
        assert!(files["sub/deeper/c.txt"].is_empty());
    }

    #[tokio::test]
    async fn test_encode_empty_dir_is_only_trailer() {
        let temp = TempDir::new().unwrap();
        let (result, bytes) = encode_dir(temp.path(), DEFAULT_CHUNK_SIZE).await;
        result.unwrap();
        assert_eq!(bytes, TRAILER.to_vec());
    }

    #[tokio::test]
    async fn test_encode_small_chunks_produce_same_archive() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("one"), vec![1u8; 5000]).unwrap();

        let (small_result, small) = encode_dir(temp.path(), 512).await;
        let (large_result, large) = encode_dir(temp.path(), DEFAULT_CHUNK_SIZE).await;
        small_result.unwrap();
        large_result.unwrap();
        assert_eq!(decode(&small), decode(&large));
    }

    #[tokio::test]
    async fn test_encode_counts_archived_files() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("x"), b"1").unwrap();
        fs::write(temp.path().join("y"), b"2").unwrap();

        let cancel = CancellationToken::new();
        let walker = TreeWalker::new(temp.path(), cancel.clone(), WalkOptions::default());
        let mut encoder = ArchiveEncoder::new(Vec::new(), cancel, DEFAULT_CHUNK_SIZE);
        encoder.encode(walker.into_stream()).await.unwrap();

        let stats = Arc::clone(encoder.stats());
        let bytes = encoder.into_sink();
        assert_eq!(stats.files_archived(), 2);
        assert_eq!(stats.entries_skipped(), 0);
        assert_eq!(stats.bytes_emitted(), bytes.len() as u64);
        assert_eq!(stats.open_files(), 0);
    }

    #[tokio::test]
    async fn test_append_skips_file_removed_before_open() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("gone.txt"), b"bye").unwrap();
        let entry = entry_for(temp.path(), "gone.txt");
        fs::remove_file(temp.path().join("gone.txt")).unwrap();

        let mut encoder = ArchiveEncoder::new(Vec::new(), CancellationToken::new(), 512);
        assert_eq!(encoder.append(&entry).await.unwrap(), Appended::Skipped);
        encoder.finish().await.unwrap();
        assert_eq!(encoder.stats().entries_skipped(), 1);
        assert_eq!(encoder.into_sink(), TRAILER.to_vec());
    }

    #[tokio::test]
    async fn test_append_aborts_when_file_shrinks_after_header() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("big.bin"), vec![9u8; 4096]).unwrap();
        let entry = entry_for(temp.path(), "big.bin");

        let sink = TamperingSink {
            out: Vec::new(),
            target: temp.path().join("big.bin"),
            action: |path| fs::write(path, vec![9u8; 100]).unwrap(),
            fired: false,
        };
        let mut encoder = ArchiveEncoder::new(sink, CancellationToken::new(), 512);
        let result = encoder.append(&entry).await;

        match result {
            Err(EncodeError::SizeMismatch {
                expected, actual, ..
            }) => {
                assert_eq!(expected, 4096);
                assert!(actual < expected);
            }
            other => panic!("Expected SizeMismatch, got: {other:?}"),
        }
        assert_eq!(encoder.stats().open_files(), 0);
        assert_eq!(encoder.stats().files_archived(), 0);
    }

    #[tokio::test]
    async fn test_append_aborts_when_file_grows_after_header() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("log.txt"), vec![b'a'; 1024]).unwrap();
        let entry = entry_for(temp.path(), "log.txt");

        let sink = TamperingSink {
            out: Vec::new(),
            target: temp.path().join("log.txt"),
            action: |path| {
                use std::io::Write;
                let mut file = fs::OpenOptions::new().append(true).open(path).unwrap();
                file.write_all(b"more").unwrap();
            },
            fired: false,
        };
        let mut encoder = ArchiveEncoder::new(sink, CancellationToken::new(), 512);
        let result = encoder.append(&entry).await;
        assert!(
            matches!(result, Err(EncodeError::SizeMismatch { expected: 1024, .. })),
            "Expected SizeMismatch, got: {result:?}"
        );
    }

    #[tokio::test]
    async fn test_encode_stops_on_closed_sink() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("a"), vec![0u8; 2048]).unwrap();

        let cancel = CancellationToken::new();
        let walker = TreeWalker::new(temp.path(), cancel.clone(), WalkOptions::default());
        let mut encoder = ArchiveEncoder::new(ClosedSink, cancel, 512);
        let result = encoder.encode(walker.into_stream()).await;
        assert!(matches!(result, Err(EncodeError::SinkClosed(_))));
        assert_eq!(encoder.stats().open_files(), 0);
    }

    #[tokio::test]
    async fn test_encode_observes_cancellation() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("a"), b"a").unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let walker = TreeWalker::new(temp.path(), cancel.clone(), WalkOptions::default());
        let mut encoder = ArchiveEncoder::new(Vec::new(), cancel, 512);
        let result = encoder.encode(walker.into_stream()).await;

        // A cancelled walker yields nothing, so the trailer write sees the token.
        assert!(matches!(result, Err(EncodeError::Cancelled)));
        assert!(encoder.into_sink().is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_encode_preserves_permission_bits() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        let script = temp.path().join("run.sh");
        fs::write(&script, b"#!/bin/sh\n").unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o750)).unwrap();

        let (result, bytes) = encode_dir(temp.path(), DEFAULT_CHUNK_SIZE).await;
        result.unwrap();
        let mut archive = tar::Archive::new(bytes.as_slice());
        let entry = archive.entries().unwrap().next().unwrap().unwrap();
        assert_eq!(entry.header().mode().unwrap(), 0o750);
    }

    #[tokio::test]
    async fn test_encode_missing_root_fails_before_output() {
        let temp = TempDir::new().unwrap();
        let (result, bytes) = encode_dir(&temp.path().join("gone"), 512).await;
        match result {
            Err(e @ EncodeError::RootUnreadable(_)) => {
                assert!(e.is_fatal());
                assert_eq!(e.root_io_kind(), Some(std::io::ErrorKind::NotFound));
            }
            other => panic!("Expected RootUnreadable, got: {other:?}"),
        }
        assert!(bytes.is_empty(), "no trailer for an archive that never started");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_encode_directory_entry_uses_its_permission_bits() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        let shared = temp.path().join("shared");
        fs::create_dir(&shared).unwrap();
        fs::set_permissions(&shared, fs::Permissions::from_mode(0o750)).unwrap();

        let cancel = CancellationToken::new();
        let options = WalkOptions {
            include_empty_dirs: true,
        };
        let walker = TreeWalker::new(temp.path(), cancel.clone(), options);
        let mut encoder = ArchiveEncoder::new(Vec::new(), cancel, DEFAULT_CHUNK_SIZE);
        encoder.encode(walker.into_stream()).await.unwrap();

        let bytes = encoder.into_sink();
        let mut archive = tar::Archive::new(bytes.as_slice());
        let entry = archive.entries().unwrap().next().unwrap().unwrap();
        assert!(entry.header().entry_type().is_dir());
        assert_eq!(entry.header().mode().unwrap(), 0o750);
    }
}
