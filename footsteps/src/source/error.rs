//! Error types for range reads.

use thiserror::Error;

/// Errors returned by a [`RangeSource`](super::RangeSource).
#[derive(Debug, Clone, Error)]
pub enum SourceError {
    /// The origin answered a partial request with a full body.
    ///
    /// Not retried; the caller may fall back to a full-file strategy or
    /// report the origin as incompatible.
    #[error("origin {url} does not honor byte-range requests: {reason}")]
    RangeUnsupported { url: String, reason: String },

    /// Cached directory metadata is stale (ETag changed or 416 returned).
    ///
    /// Recoverable by re-reading the archive header from offset 0.
    #[error("archive at {url} changed (ETag mismatch)")]
    EtagMismatch { url: String },

    /// The archive does not exist at the origin.
    #[error("archive not found: {url}")]
    NotFound { url: String },

    /// The request was cancelled. Never a failure, never cached.
    #[error("request aborted")]
    Aborted,

    /// Unexpected HTTP status.
    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },

    /// Transport-level failure.
    #[error("HTTP request to {url} failed: {reason}")]
    Http { url: String, reason: String },
}

impl SourceError {
    /// Whether this is a cancellation rather than a failure.
    pub fn is_abort(&self) -> bool {
        matches!(self, SourceError::Aborted)
    }
}
