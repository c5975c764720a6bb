//! Response header values: content type, disposition, and modification time.

use std::path::Path;
use std::time::SystemTime;

/// Content type of a directory archive.
pub const TAR_CONTENT_TYPE: &str = "application/x-tar";

/// Name used for the archive of the sandbox root itself.
pub const ROOT_ARCHIVE_NAME: &str = "root";

/// Guesses a content type from the file extension.
#[must_use]
pub fn content_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    match ext.as_str() {
        "html" | "htm" => "text/html; charset=utf-8",
        "css" => "text/css; charset=utf-8",
        "js" | "mjs" => "text/javascript; charset=utf-8",
        "json" => "application/json",
        "xml" => "application/xml",
        "txt" | "md" | "rs" | "py" | "sh" | "toml" | "yml" | "yaml" | "csv" | "log" => {
            "text/plain; charset=utf-8"
        }
        "pdf" => "application/pdf",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "webp" => "image/webp",
        "ico" => "image/x-icon",
        "mp3" => "audio/mpeg",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "wasm" => "application/wasm",
        "zip" => "application/zip",
        "gz" | "tgz" => "application/gzip",
        "tar" => TAR_CONTENT_TYPE,
        _ => "application/octet-stream",
    }
}

/// Builds an `attachment` disposition with an RFC 5987 encoded filename.
///
/// The value is pure ASCII, so it is always a valid header value.
#[must_use]
pub fn attachment(filename: &str) -> String {
    format!(
        "attachment; filename*=UTF-8''{}",
        urlencoding::encode(filename)
    )
}

/// Filename for the archive of a directory: its last path segment, or
/// [`ROOT_ARCHIVE_NAME`] for the sandbox root, with `.tar` appended.
#[must_use]
pub fn archive_filename(dir_name: Option<&str>) -> String {
    format!("{}.tar", dir_name.unwrap_or(ROOT_ARCHIVE_NAME))
}

/// Formats a modification time as an HTTP date.
#[must_use]
pub fn last_modified(time: SystemTime) -> String {
    httpdate::fmt_http_date(time)
}
