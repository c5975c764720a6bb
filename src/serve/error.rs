//! Request errors and their HTTP mapping.

use std::path::PathBuf;

use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::archive::EncodeError;
use crate::guard::GuardError;

/// Errors that end a request before a body is committed.
#[derive(Debug, Error)]
pub enum ServeError {
    /// Path validation failed.
    #[error(transparent)]
    Guard(#[from] GuardError),

    /// The request carried a `Range` header on a download.
    #[error("byte ranges are not supported")]
    RangeNotSatisfiable,

    /// Only GET and HEAD are served.
    #[error("method {method} not allowed")]
    MethodNotAllowed {
        /// The rejected method.
        method: String,
    },

    /// The path exists but is neither a regular file nor a directory.
    #[error("not a file or directory: {path}")]
    Unsupported {
        /// Offending path.
        path: PathBuf,
    },

    /// Filesystem failure while preparing the response.
    #[error("IO error on {path}: {source}")]
    Io {
        /// Path being accessed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The archive session failed before sending any bytes.
    #[error("archive failed before streaming: {0}")]
    Archive(#[source] EncodeError),
}

impl ServeError {
    /// Creates an I/O error with path context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// HTTP status for this error.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Guard(GuardError::Forbidden { .. }) => StatusCode::FORBIDDEN,
            Self::Guard(GuardError::NotFound { .. }) | Self::Unsupported { .. } => {
                StatusCode::NOT_FOUND
            }
            Self::RangeNotSatisfiable => StatusCode::RANGE_NOT_SATISFIABLE,
            Self::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            Self::Io { source, .. } if source.kind() == std::io::ErrorKind::NotFound => {
                StatusCode::NOT_FOUND
            }
            Self::Io { source, .. } if source.kind() == std::io::ErrorKind::PermissionDenied => {
                StatusCode::FORBIDDEN
            }
            Self::Archive(e) if e.root_io_kind() == Some(std::io::ErrorKind::NotFound) => {
                StatusCode::NOT_FOUND
            }
            Self::Archive(e) if e.root_io_kind() == Some(std::io::ErrorKind::PermissionDenied) => {
                StatusCode::FORBIDDEN
            }
            Self::Archive(EncodeError::Cancelled) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Guard(_) | Self::Io { .. } | Self::Archive(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ServeError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, status = status.as_u16(), "request failed");
        } else if status == StatusCode::FORBIDDEN {
            warn!(error = %self, "request rejected");
        } else {
            debug!(error = %self, status = status.as_u16(), "request rejected");
        }

        let reason = status.canonical_reason().unwrap_or("Error");
        let mut response = (status, format!("{} {reason}\n", status.as_u16())).into_response();
        match self {
            Self::RangeNotSatisfiable => {
                response
                    .headers_mut()
                    .insert(header::ACCEPT_RANGES, header::HeaderValue::from_static("none"));
            }
            Self::MethodNotAllowed { .. } => {
                response
                    .headers_mut()
                    .insert(header::ALLOW, header::HeaderValue::from_static("GET, HEAD"));
            }
            _ => {}
        }
        response
    }
}
