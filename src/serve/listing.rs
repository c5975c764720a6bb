//! Directory listings rendered as HTML or JSON.

use std::fmt::Write as _;
use std::fs::Metadata;
use std::path::Path;

use serde::Serialize;
use tracing::{debug, trace};

use super::headers;
use crate::guard::ResolvedPath;

/// One child of a listed directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListingEntry {
    /// File or directory name.
    pub name: String,
    /// True for subdirectories.
    pub is_dir: bool,
    /// Size in bytes (0 for directories).
    pub size: u64,
    /// Last modification time as an HTTP date, if available.
    pub modified: Option<String>,
}

/// Contents of one directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Listing {
    /// Slash-separated path relative to the sandbox root, starting with `/`.
    pub path: String,
    /// Children, directories first, then by name.
    pub entries: Vec<ListingEntry>,
}

/// Reads the directory at `dir`.
///
/// Only regular files and directories are listed, the same set that ends up
/// in an archive; symlinks and special files are left out, as are names that
/// are not valid UTF-8.
///
/// # Errors
///
/// Returns the IO error from opening or enumerating the directory.
pub async fn read_listing(dir: &ResolvedPath) -> std::io::Result<Listing> {
    let mut reader = tokio::fs::read_dir(dir.absolute()).await?;
    let mut entries = Vec::new();

    while let Some(child) = reader.next_entry().await? {
        let Ok(name) = child.file_name().into_string() else {
            trace!(path = %child.path().display(), "non-UTF-8 name left out of listing");
            continue;
        };
        let metadata = child.metadata().await;
        if let Some(entry) = listing_entry(name, &child.path(), metadata) {
            entries.push(entry);
        }
    }

    entries.sort_by(|a, b| b.is_dir.cmp(&a.is_dir).then_with(|| a.name.cmp(&b.name)));
    Ok(Listing {
        path: format!("/{}", dir.relative()),
        entries,
    })
}

/// Builds the entry for one child, or `None` if it is left out.
fn listing_entry(
    name: String,
    path: &Path,
    metadata: std::io::Result<Metadata>,
) -> Option<ListingEntry> {
    let metadata = match metadata {
        Ok(metadata) => metadata,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "entry without metadata left out of listing");
            return None;
        }
    };
    let file_type = metadata.file_type();
    if !file_type.is_dir() && !file_type.is_file() {
        trace!(path = %path.display(), "non-regular entry left out of listing");
        return None;
    }
    Some(ListingEntry {
        name,
        is_dir: file_type.is_dir(),
        size: if file_type.is_dir() { 0 } else { metadata.len() },
        modified: metadata.modified().ok().map(headers::last_modified),
    })
}

impl Listing {
    /// Renders the listing as a standalone HTML page.
    ///
    /// Names are HTML-escaped and links are percent-encoded per segment, so
    /// any file name round-trips through the server.
    #[must_use]
    pub fn to_html(&self) -> String {
        let base = link_base(&self.path);
        let title = escape_html(&self.path);

        let mut html = String::with_capacity(512 + self.entries.len() * 96);
        let _ = write!(
            html,
            "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>Index of {title}</title></head>\n<body>\n<h1>Index of {title}</h1>\n"
        );
        let _ = writeln!(
            html,
            "<p><a href=\"{}?download\">Download as .tar</a></p>",
            if base.is_empty() { "/" } else { base.as_str() }
        );
        html.push_str("<ul>\n");
        if self.path != "/" {
            let _ = writeln!(html, "<li><a href=\"{}\">../</a></li>", parent_link(&base));
        }
        for entry in &self.entries {
            let href = format!("{base}/{}", urlencoding::encode(&entry.name));
            let label = escape_html(&entry.name);
            if entry.is_dir {
                let _ = writeln!(html, "<li><a href=\"{href}\">{label}/</a></li>");
            } else {
                let _ = writeln!(
                    html,
                    "<li><a href=\"{href}\">{label}</a> ({} bytes)</li>",
                    entry.size
                );
            }
        }
        html.push_str("</ul>\n</body></html>\n");
        html
    }
}

/// Percent-encoded path of the listed directory without a trailing slash
/// (empty for the root).
fn link_base(path: &str) -> String {
    path.split('/')
        .filter(|s| !s.is_empty())
        .fold(String::new(), |mut out, segment| {
            out.push('/');
            out.push_str(&urlencoding::encode(segment));
            out
        })
}

fn parent_link(base: &str) -> &str {
    match base.rfind('/') {
        Some(0) | None => "/",
        Some(idx) => &base[..idx],
    }
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}
