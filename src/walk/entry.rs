use std::fs::Metadata;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

/// One item discovered by the walker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Slash-separated path relative to the walk root (e.g. `src/lib.rs`).
    pub relative_path: String,
    /// Absolute path on disk.
    pub absolute_path: PathBuf,
    /// Size in bytes at discovery time (0 for directories).
    pub size: u64,
    /// True only for empty-directory entries.
    pub is_directory: bool,
    /// Last modification time.
    pub modified: SystemTime,
    /// Permission bits at discovery time.
    pub mode: u32,
}

impl FileEntry {
    pub(crate) fn file(relative_path: String, absolute_path: PathBuf, metadata: &Metadata) -> Self {
        Self {
            relative_path,
            absolute_path,
            size: metadata.len(),
            is_directory: false,
            modified: metadata.modified().unwrap_or(UNIX_EPOCH),
            mode: permission_bits(metadata),
        }
    }

    /// Empty-directory entry; without metadata it falls back to now and 0o755.
    pub(crate) fn directory(
        relative_path: String,
        absolute_path: PathBuf,
        metadata: Option<&Metadata>,
    ) -> Self {
        Self {
            relative_path,
            absolute_path,
            size: 0,
            is_directory: true,
            modified: metadata
                .and_then(|m| m.modified().ok())
                .unwrap_or_else(SystemTime::now),
            mode: metadata.map_or(0o755, permission_bits),
        }
    }
}

/// Permission bits recorded in tar headers.
#[cfg(unix)]
pub(crate) fn permission_bits(metadata: &Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o7777
}

/// Permission bits recorded in tar headers.
#[cfg(not(unix))]
pub(crate) fn permission_bits(metadata: &Metadata) -> u32 {
    match (metadata.is_dir(), metadata.permissions().readonly()) {
        (true, true) => 0o555,
        (true, false) => 0o755,
        (false, true) => 0o444,
        (false, false) => 0o644,
    }
}
