//! Sandbox path resolution.
//!
//! Every client-supplied path goes through [`resolve`] before the server
//! touches the filesystem. Resolution is purely lexical: the raw path is
//! percent-decoded, split on both `/` and `\`, normalized, and joined onto
//! the [`SandboxRoot`]. A `..` that would climb above the root is rejected
//! rather than clamped.
//!
//! [`resolve_existing`] is the second step used by the dispatcher: it
//! canonicalizes the lexically valid path and rejects symlinks whose target
//! lies outside the root.

mod error;

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

pub use error::GuardError;

/// Canonical directory that bounds every request.
///
/// Resolved once at startup and shared read-only between all sessions.
#[derive(Debug, Clone)]
pub struct SandboxRoot {
    path: Arc<Path>,
}

impl SandboxRoot {
    /// Canonicalizes `path` and checks that it is a directory.
    ///
    /// # Errors
    ///
    /// Returns [`GuardError::InvalidRoot`] if the path cannot be resolved and
    /// [`GuardError::RootNotDirectory`] if it resolves to something else.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, GuardError> {
        let path = path.as_ref();
        let canonical = std::fs::canonicalize(path).map_err(|source| GuardError::InvalidRoot {
            path: path.to_path_buf(),
            source,
        })?;
        let metadata = std::fs::metadata(&canonical).map_err(|source| GuardError::InvalidRoot {
            path: canonical.clone(),
            source,
        })?;
        if !metadata.is_dir() {
            return Err(GuardError::RootNotDirectory { path: canonical });
        }
        Ok(Self::from_canonical(canonical))
    }

    /// Wraps a path that is already absolute and canonical.
    pub(crate) fn from_canonical(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Arc::from(path.into()),
        }
    }

    /// Returns the canonical root path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// A request path that has passed sandbox validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
    absolute: PathBuf,
    segments: Vec<String>,
}

impl ResolvedPath {
    /// Absolute filesystem path inside the sandbox.
    #[must_use]
    pub fn absolute(&self) -> &Path {
        &self.absolute
    }

    /// Normalized segments relative to the sandbox root.
    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Slash-joined path relative to the root (`""` for the root itself).
    #[must_use]
    pub fn relative(&self) -> String {
        self.segments.join("/")
    }

    /// Returns true if this is the sandbox root.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Last segment, if any.
    #[must_use]
    pub fn file_name(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }
}

/// Resolves a raw request path against the sandbox root.
///
/// No filesystem access happens here; existence is checked later by the
/// caller.
///
/// # Errors
///
/// Returns [`GuardError::Forbidden`] if the path is not valid UTF-8 after
/// percent-decoding, contains a NUL byte, contains a segment that is not a
/// plain name, or climbs above the root.
pub fn resolve(root: &SandboxRoot, requested: &str) -> Result<ResolvedPath, GuardError> {
    let decoded =
        urlencoding::decode(requested).map_err(|_| GuardError::forbidden(requested))?;
    if decoded.contains('\0') {
        return Err(GuardError::forbidden(requested));
    }

    let mut segments: Vec<String> = Vec::new();
    for segment in decoded.split(['/', '\\']) {
        match segment {
            "" | "." => {}
            ".." => {
                if segments.pop().is_none() {
                    debug!(requested, "path climbs above sandbox root");
                    return Err(GuardError::forbidden(requested));
                }
            }
            name => {
                if !is_plain_name(name) {
                    return Err(GuardError::forbidden(requested));
                }
                segments.push(name.to_string());
            }
        }
    }

    let mut absolute = root.path().to_path_buf();
    absolute.extend(&segments);
    if !absolute.starts_with(root.path()) {
        return Err(GuardError::forbidden(requested));
    }

    Ok(ResolvedPath { absolute, segments })
}

/// Resolves a request path and confirms it exists inside the sandbox.
///
/// Symlinks are resolved; a target outside the root is forbidden.
///
/// # Errors
///
/// Returns the errors of [`resolve`], plus [`GuardError::NotFound`] when the
/// path does not exist and [`GuardError::Io`] for other filesystem failures.
pub async fn resolve_existing(
    root: &SandboxRoot,
    requested: &str,
) -> Result<ResolvedPath, GuardError> {
    let resolved = resolve(root, requested)?;
    let canonical = match tokio::fs::canonicalize(&resolved.absolute).await {
        Ok(path) => path,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(GuardError::not_found(requested));
        }
        Err(e) => return Err(GuardError::io(resolved.absolute, e)),
    };
    if !canonical.starts_with(root.path()) {
        debug!(requested, target = %canonical.display(), "symlink target escapes sandbox");
        return Err(GuardError::forbidden(requested));
    }
    Ok(ResolvedPath {
        absolute: canonical,
        segments: resolved.segments,
    })
}

/// A segment must parse as exactly one normal path component. This rejects
/// drive prefixes such as `C:` on Windows.
fn is_plain_name(segment: &str) -> bool {
    let mut components = Path::new(segment).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn serve_root() -> SandboxRoot {
        SandboxRoot::from_canonical("/serve")
    }

    #[test]
    fn test_resolve_rejects_parent_traversal() {
        let result = resolve(&serve_root(), "../../etc/passwd");
        assert!(matches!(result, Err(GuardError::Forbidden { .. })));
    }

    #[test]
    fn test_resolve_rejects_encoded_traversal() {
        let result = resolve(&serve_root(), "%2e%2e/%2e%2e/etc/passwd");
        assert!(matches!(result, Err(GuardError::Forbidden { .. })));
    }

    #[test]
    fn test_resolve_rejects_encoded_backslash_traversal() {
        let result = resolve(&serve_root(), "docs%5C..%5C..%5Cetc");
        assert!(matches!(result, Err(GuardError::Forbidden { .. })));
    }

    #[test]
    fn test_resolve_rejects_nul_byte() {
        let result = resolve(&serve_root(), "file%00.txt");
        assert!(matches!(result, Err(GuardError::Forbidden { .. })));
    }

    #[test]
    fn test_resolve_rejects_invalid_utf8() {
        let result = resolve(&serve_root(), "%ff%fe");
        assert!(matches!(result, Err(GuardError::Forbidden { .. })));
    }

    #[test]
    fn test_resolve_absolute_injection_stays_under_root() {
        let resolved = resolve(&serve_root(), "//etc/passwd").unwrap();
        assert_eq!(resolved.absolute(), Path::new("/serve/etc/passwd"));
    }

    #[test]
    fn test_resolve_collapses_dot_segments_inside_root() {
        let resolved = resolve(&serve_root(), "/a/./b/../c/").unwrap();
        assert_eq!(resolved.absolute(), Path::new("/serve/a/c"));
        assert_eq!(resolved.relative(), "a/c");
        assert_eq!(resolved.file_name(), Some("c"));
    }

    #[test]
    fn test_resolve_parent_back_to_root_is_allowed() {
        let resolved = resolve(&serve_root(), "a/..").unwrap();
        assert!(resolved.is_root());
        assert_eq!(resolved.absolute(), Path::new("/serve"));
    }

    #[test]
    fn test_resolve_decodes_percent_encoded_names() {
        let resolved = resolve(&serve_root(), "/my%20docs/r%C3%A9sum%C3%A9.pdf").unwrap();
        assert_eq!(resolved.segments(), ["my docs", "résumé.pdf"]);
    }

    #[test]
    fn test_sandbox_root_rejects_file() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("plain.txt");
        std::fs::write(&file, b"x").unwrap();
        let result = SandboxRoot::new(&file);
        assert!(matches!(result, Err(GuardError::RootNotDirectory { .. })));
    }

    #[test]
    fn test_sandbox_root_rejects_missing_dir() {
        let temp = TempDir::new().unwrap();
        let result = SandboxRoot::new(temp.path().join("missing"));
        assert!(matches!(result, Err(GuardError::InvalidRoot { .. })));
    }

    #[tokio::test]
    async fn test_resolve_existing_reports_not_found() {
        let temp = TempDir::new().unwrap();
        let root = SandboxRoot::new(temp.path()).unwrap();
        let result = resolve_existing(&root, "nope.txt").await;
        assert!(matches!(result, Err(GuardError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_resolve_existing_returns_canonical_path() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir(temp.path().join("sub")).unwrap();
        let root = SandboxRoot::new(temp.path()).unwrap();
        let resolved = resolve_existing(&root, "/sub/").await.unwrap();
        assert_eq!(resolved.absolute(), root.path().join("sub"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_resolve_existing_rejects_symlink_escape() {
        let outside = TempDir::new().unwrap();
        std::fs::write(outside.path().join("secret"), b"s").unwrap();
        let temp = TempDir::new().unwrap();
        std::os::unix::fs::symlink(outside.path(), temp.path().join("link")).unwrap();
        let root = SandboxRoot::new(temp.path()).unwrap();

        let result = resolve_existing(&root, "link/secret").await;
        assert!(matches!(result, Err(GuardError::Forbidden { .. })));
    }
}
