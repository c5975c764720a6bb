//! Lazy, cancellable directory traversal.
//!
//! [`TreeWalker`] yields one [`FileEntry`] per regular file below a root
//! directory. Traversal uses an explicit work-list instead of recursion, and
//! only one directory handle is open at a time.
//!
//! # Policy
//!
//! - Symlinks are never followed and never yielded, so cycles cannot occur.
//! - Sockets, FIFOs and device nodes are skipped.
//! - A failing entry produces a [`WalkEntryError`] and the walk continues.
//!   A root that cannot be opened yields [`WalkEntryError::Root`] and ends it.
//! - Once the cancellation token fires, the open directory handle and the
//!   pending work-list are dropped and no further entries are produced.

mod entry;
mod error;

use std::path::{Path, PathBuf};

use futures_util::Stream;
use tokio::fs::{DirEntry, ReadDir};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

pub use entry::FileEntry;
pub(crate) use entry::permission_bits;
pub use error::WalkEntryError;

/// Traversal options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WalkOptions {
    /// Emit a directory entry for every directory with no walkable children.
    pub include_empty_dirs: bool,
}

/// Directory currently being enumerated.
struct OpenDir {
    relative: String,
    reader: ReadDir,
    children: usize,
}

/// Pull-based walker over all regular files below a root directory.
///
/// Each call to [`next`](Self::next) performs at most one directory
/// enumeration step, so a caller that stops pulling also stops all
/// filesystem activity.
pub struct TreeWalker {
    root: PathBuf,
    pending: Vec<String>,
    current: Option<OpenDir>,
    cancel: CancellationToken,
    options: WalkOptions,
    done: bool,
}

impl TreeWalker {
    /// Creates a walker rooted at `root`. No IO happens until the first pull.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, cancel: CancellationToken, options: WalkOptions) -> Self {
        Self {
            root: root.into(),
            pending: vec![String::new()],
            current: None,
            cancel,
            options,
            done: false,
        }
    }

    /// Returns the walk root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Pulls the next entry.
    ///
    /// Returns `None` when the tree is exhausted or the walk was cancelled.
    pub async fn next(&mut self) -> Option<Result<FileEntry, WalkEntryError>> {
        loop {
            if self.done {
                return None;
            }
            if self.cancel.is_cancelled() {
                self.release();
                return None;
            }

            let step = match self.current.as_mut() {
                Some(dir) => {
                    tokio::select! {
                        biased;
                        () = self.cancel.cancelled() => None,
                        step = dir.reader.next_entry() => Some(step),
                    }
                }
                None => {
                    let Some(relative) = self.pending.pop() else {
                        self.done = true;
                        return None;
                    };
                    let absolute = self.absolute(&relative);
                    match tokio::fs::read_dir(&absolute).await {
                        Ok(reader) => {
                            trace!(dir = %absolute.display(), "opened directory");
                            self.current = Some(OpenDir {
                                relative,
                                reader,
                                children: 0,
                            });
                            continue;
                        }
                        Err(e) if relative.is_empty() => {
                            self.done = true;
                            return Some(Err(WalkEntryError::root(absolute, e)));
                        }
                        Err(e) => return Some(Err(WalkEntryError::read_dir(absolute, e))),
                    }
                }
            };

            let Some(step) = step else {
                self.release();
                return None;
            };

            match step {
                Ok(Some(entry)) => {
                    if let Some(item) = self.visit(entry).await {
                        return Some(item);
                    }
                }
                Ok(None) => {
                    if let Some(entry) = self.close_current().await {
                        return Some(Ok(entry));
                    }
                }
                Err(e) => {
                    let dir = self.current.take();
                    let relative = dir.map(|d| d.relative).unwrap_or_default();
                    return Some(Err(WalkEntryError::read_dir(self.absolute(&relative), e)));
                }
            }
        }
    }

    /// Adapts the walker into a [`Stream`].
    pub fn into_stream(self) -> impl Stream<Item = Result<FileEntry, WalkEntryError>> + Send {
        futures_util::stream::unfold(self, |mut walker| async move {
            let item = walker.next().await?;
            Some((item, walker))
        })
    }

    async fn visit(&mut self, entry: DirEntry) -> Option<Result<FileEntry, WalkEntryError>> {
        let path = entry.path();
        let file_name = entry.file_name();
        let Some(name) = file_name.to_str() else {
            return Some(Err(WalkEntryError::non_utf8(path)));
        };

        let file_type = match entry.file_type().await {
            Ok(file_type) => file_type,
            Err(e) => return Some(Err(WalkEntryError::metadata(path, e))),
        };

        let dir = self.current.as_mut()?;
        let relative = if dir.relative.is_empty() {
            name.to_string()
        } else {
            format!("{}/{name}", dir.relative)
        };

        if file_type.is_dir() {
            dir.children += 1;
            self.pending.push(relative);
            None
        } else if file_type.is_file() {
            match entry.metadata().await {
                Ok(metadata) => {
                    dir.children += 1;
                    Some(Ok(FileEntry::file(relative, path, &metadata)))
                }
                Err(e) => Some(Err(WalkEntryError::metadata(path, e))),
            }
        } else {
            trace!(path = %path.display(), symlink = file_type.is_symlink(), "skipping non-regular entry");
            None
        }
    }

    /// Drops the exhausted directory handle and, if configured, reports it as
    /// an empty directory.
    async fn close_current(&mut self) -> Option<FileEntry> {
        let dir = self.current.take()?;
        if !self.options.include_empty_dirs || dir.children > 0 || dir.relative.is_empty() {
            return None;
        }
        let absolute = self.absolute(&dir.relative);
        let metadata = tokio::fs::metadata(&absolute).await.ok();
        Some(FileEntry::directory(dir.relative, absolute, metadata.as_ref()))
    }

    fn absolute(&self, relative: &str) -> PathBuf {
        if relative.is_empty() {
            self.root.clone()
        } else {
            self.root.join(relative)
        }
    }

    fn release(&mut self) {
        if !self.done {
            debug!(
                root = %self.root.display(),
                pending_dirs = self.pending.len(),
                "walk cancelled"
            );
        }
        self.current = None;
        self.pending.clear();
        self.done = true;
    }
}
