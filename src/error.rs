//! Unified HTTP error type for axum request handlers.
//!
//! [`ErrorKind`] enumerates every failure mode the dispatch pipeline can
//! surface and carries the status code that goes with it. [`AppError`]
//! wraps it (plus an optional `anyhow::Error` source for logging) and
//! implements [`IntoResponse`], so handlers can return `Result<T, AppError>`
//! and propagate with `?` — the difference from a single-variant error type
//! is that the response now varies by failure instead of always being 500.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// One variant per failure mode the dispatch pipeline (C2–C9) can surface,
/// each mapped to the HTTP status it must produce.
#[derive(Debug, Error)]
pub enum ErrorKind {
    #[error("missing or malformed authorization header")]
    AuthScheme,
    #[error("invalid or expired API key")]
    InvalidKey,
    #[error("caller lacks the permissions required for this endpoint")]
    InsufficientPermission,
    #[error("rate limit exceeded: {0}")]
    RateLimitExceeded(String),
    #[error("model not found: {0}")]
    ModelNotFound(String),
    #[error("router configuration is inconsistent")]
    RouterInconsistency,
    #[error("failed to translate request for upstream provider")]
    RequestFormatFailed,
    #[error("failed to translate upstream response")]
    ResponseFormatFailed,
    #[error("upstream provider is overloaded")]
    UpstreamOverloaded,
    #[error("upstream error ({status}): {detail}")]
    UpstreamError { status: StatusCode, detail: String },
    #[error("dispatch timed out waiting for an available provider")]
    DispatchTimeout,
    #[error("uploaded file exceeds the configured size limit")]
    FileSizeExceeded,
    #[error("unsupported file type: {0}")]
    UnsupportedFileType(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ErrorKind {
    fn status(&self) -> StatusCode {
        match self {
            ErrorKind::AuthScheme => StatusCode::FORBIDDEN,
            ErrorKind::InvalidKey => StatusCode::FORBIDDEN,
            ErrorKind::InsufficientPermission => StatusCode::FORBIDDEN,
            ErrorKind::RateLimitExceeded(_) => StatusCode::TOO_MANY_REQUESTS,
            ErrorKind::ModelNotFound(_) => StatusCode::NOT_FOUND,
            ErrorKind::RouterInconsistency => StatusCode::FORBIDDEN,
            ErrorKind::RequestFormatFailed => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorKind::ResponseFormatFailed => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorKind::UpstreamOverloaded => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::UpstreamError { status, .. } => *status,
            ErrorKind::DispatchTimeout => StatusCode::GATEWAY_TIMEOUT,
            ErrorKind::FileSizeExceeded => StatusCode::PAYLOAD_TOO_LARGE,
            ErrorKind::UnsupportedFileType(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorKind::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// The error type returned by every fallible axum handler in the crate.
#[derive(Debug)]
pub struct AppError {
    kind: ErrorKind,
    /// Extra context logged but never exposed to the caller.
    source: Option<anyhow::Error>,
}

impl AppError {
    pub fn new(kind: ErrorKind) -> Self {
        Self { kind, source: None }
    }

    pub fn with_source(kind: ErrorKind, source: anyhow::Error) -> Self {
        Self {
            kind,
            source: Some(source),
        }
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.kind.status();
        if let Some(source) = &self.source {
            tracing::warn!(error = %source, kind = %self.kind, "request failed");
        } else if status.is_server_error() {
            tracing::warn!(kind = %self.kind, "request failed");
        } else {
            tracing::debug!(kind = %self.kind, "request rejected");
        }
        (status, Json(json!({ "detail": self.kind.to_string() }))).into_response()
    }
}

impl From<ErrorKind> for AppError {
    fn from(kind: ErrorKind) -> Self {
        Self::new(kind)
    }
}

/// Anything outside the explicit taxonomy is an internal error — this keeps
/// `?` working for `reqwest`/`std::io`/etc. failures that aren't already one
/// of the named kinds above.
impl From<anyhow::Error> for AppError {
    fn from(e: anyhow::Error) -> Self {
        Self::with_source(ErrorKind::Internal(e.to_string()), e)
    }
}
