//! HTTP front end.
//!
//! A single fallback handler dispatches every request:
//!
//! - a directory is listed as HTML, or as JSON with `?format=json`;
//! - a directory with `?download` is streamed as a tar archive;
//! - a file is streamed with its length, type and modification time, and
//!   `?download` marks it as an attachment.
//!
//! HEAD is answered like GET with the same headers and no body.
//! Every path goes through [`crate::guard`] before any filesystem access.
//! File and archive bodies do not support byte ranges; a `Range` header on
//! either is answered with 416.

mod error;
pub mod headers;
pub mod listing;

use std::net::SocketAddr;

use axum::Router;
use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, HeaderValue, Method, Uri, header};
use axum::response::{Html, IntoResponse, Json, Response};
use serde::Deserialize;
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use crate::guard::{self, ResolvedPath, SandboxRoot};
use crate::pipeline::{self, PipelineOptions};

pub use error::ServeError;
pub use listing::{Listing, ListingEntry};

/// Shared, read-only state handed to every request.
#[derive(Debug, Clone)]
pub struct AppState {
    root: SandboxRoot,
    options: PipelineOptions,
    shutdown: CancellationToken,
}

impl AppState {
    /// Creates the state. Every archive session gets a child of `shutdown`.
    #[must_use]
    pub fn new(root: SandboxRoot, options: PipelineOptions, shutdown: CancellationToken) -> Self {
        Self {
            root,
            options,
            shutdown,
        }
    }

    /// Sandbox root.
    #[must_use]
    pub fn root(&self) -> &SandboxRoot {
        &self.root
    }

    /// Archive pipeline tuning.
    #[must_use]
    pub fn options(&self) -> PipelineOptions {
        self.options
    }

    /// Token that stops the server and every running session.
    #[must_use]
    pub fn shutdown(&self) -> &CancellationToken {
        &self.shutdown
    }
}

/// Query parameters understood by the dispatcher.
#[derive(Debug, Default, Deserialize)]
struct RequestQuery {
    download: Option<String>,
    format: Option<String>,
}

impl RequestQuery {
    fn is_download(&self) -> bool {
        self.download.is_some()
    }

    fn wants_json(&self) -> bool {
        self.format.as_deref() == Some("json")
    }
}

/// Builds the application router.
pub fn router(state: AppState) -> Router {
    Router::new().fallback(dispatch).with_state(state)
}

/// Serves `state` on `listener` until the shutdown token is cancelled.
///
/// # Errors
///
/// Returns the IO error that stopped the accept loop.
pub async fn serve(listener: TcpListener, state: AppState) -> std::io::Result<()> {
    let addr: SocketAddr = listener.local_addr()?;
    let shutdown = state.shutdown.clone();
    info!(%addr, root = %state.root.path().display(), "serving directory");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    info!("server stopped");
    Ok(())
}

#[instrument(level = "debug", skip_all, fields(method = %method, path = %uri.path()))]
async fn dispatch(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    Query(query): Query<RequestQuery>,
    headers: HeaderMap,
) -> Response {
    match handle(&state, &method, &uri, &query, &headers).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    }
}

async fn handle(
    state: &AppState,
    method: &Method,
    uri: &Uri,
    query: &RequestQuery,
    headers: &HeaderMap,
) -> Result<Response, ServeError> {
    if *method != Method::GET && *method != Method::HEAD {
        return Err(ServeError::MethodNotAllowed {
            method: method.to_string(),
        });
    }
    let head = *method == Method::HEAD;

    let resolved = guard::resolve_existing(&state.root, uri.path()).await?;
    let metadata = tokio::fs::metadata(resolved.absolute())
        .await
        .map_err(|e| ServeError::io(resolved.absolute(), e))?;

    if metadata.is_dir() {
        if query.is_download() {
            reject_range(headers)?;
            return archive_response(state, &resolved, head).await;
        }
        let listing = listing::read_listing(&resolved)
            .await
            .map_err(|e| ServeError::io(resolved.absolute(), e))?;
        if query.wants_json() {
            return Ok(Json(listing).into_response());
        }
        return Ok(Html(listing.to_html()).into_response());
    }

    if metadata.is_file() {
        reject_range(headers)?;
        return file_response(state, &resolved, query.is_download(), head).await;
    }

    Err(ServeError::Unsupported {
        path: resolved.absolute().to_path_buf(),
    })
}

fn reject_range(headers: &HeaderMap) -> Result<(), ServeError> {
    if headers.contains_key(header::RANGE) {
        return Err(ServeError::RangeNotSatisfiable);
    }
    Ok(())
}

/// Starts an archive session and commits to a 200 only once it has produced
/// its first chunk.
///
/// HEAD only checks that the directory can be opened; no session is started.
#[instrument(skip_all, fields(dir = %resolved.relative()))]
async fn archive_response(
    state: &AppState,
    resolved: &ResolvedPath,
    head: bool,
) -> Result<Response, ServeError> {
    let filename = headers::archive_filename(resolved.file_name());
    let parts = [
        (header::CONTENT_TYPE, headers::TAR_CONTENT_TYPE.to_string()),
        (header::CONTENT_DISPOSITION, headers::attachment(&filename)),
        (header::ACCEPT_RANGES, "none".to_string()),
    ];

    if head {
        tokio::fs::read_dir(resolved.absolute())
            .await
            .map_err(|e| ServeError::io(resolved.absolute(), e))?;
        return Ok((parts, Body::empty()).into_response());
    }

    let cancel = state.shutdown.child_token();
    let mut stream = pipeline::archive_directory(resolved.absolute(), cancel, state.options);
    stream.prime().await.map_err(ServeError::Archive)?;

    info!(session = stream.stats().id(), filename = %filename, "streaming archive");
    Ok((parts, Body::from_stream(stream)).into_response())
}

/// Streams one regular file.
///
/// The body is capped at the length taken from the open handle, so a file
/// that grows is cut at the advertised `Content-Length`; one that shrinks
/// ends the body early and the connection is aborted.
async fn file_response(
    state: &AppState,
    resolved: &ResolvedPath,
    download: bool,
    head: bool,
) -> Result<Response, ServeError> {
    let path = resolved.absolute();
    let file = File::open(path).await.map_err(|e| ServeError::io(path, e))?;
    let metadata = file.metadata().await.map_err(|e| ServeError::io(path, e))?;
    let len = metadata.len();

    let mut response_headers = HeaderMap::new();
    response_headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(headers::content_type_for(path)),
    );
    response_headers.insert(header::CONTENT_LENGTH, HeaderValue::from(len));
    response_headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("none"));
    if let Some(value) = metadata
        .modified()
        .ok()
        .and_then(|t| HeaderValue::from_str(&headers::last_modified(t)).ok())
    {
        response_headers.insert(header::LAST_MODIFIED, value);
    }
    if download {
        let name = resolved.file_name().unwrap_or("download");
        if let Ok(value) = HeaderValue::from_str(&headers::attachment(name)) {
            response_headers.insert(header::CONTENT_DISPOSITION, value);
        }
    }

    if head {
        return Ok((response_headers, Body::empty()).into_response());
    }

    info!(path = %resolved.relative(), size = len, download, "serving file");
    let body = Body::from_stream(ReaderStream::with_capacity(
        file.take(len),
        state.options.chunk_size,
    ));
    Ok((response_headers, body).into_response())
}
