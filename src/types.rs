//! Shared error type for the documentation search engine.

use thiserror::Error;

/// Errors surfaced by ingestion, storage, and search operations.
///
/// Variants map onto how callers are expected to react: transient fetch
/// failures are retried in place, per-document failures are counted and
/// skipped, everything else propagates to the command layer.
#[derive(Debug, Error)]
pub enum DocsError {
    /// Missing or malformed environment configuration. Fatal to the command.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A named source or group does not exist. Fatal to the command.
    #[error("not found: {0}")]
    NotFound(String),

    /// An HTTP or provider failure that a retry might fix.
    #[error("transient fetch failure: {0}")]
    FetchTransient(String),

    /// A fetch failure that aborts the current source.
    #[error("fetch failed: {0}")]
    FetchFatal(String),

    /// Parse, chunk, embed, or upsert failure for a single document.
    #[error("document processing failed: {0}")]
    Document(String),

    /// Embedding provider rejected the request (non-retryable).
    #[error("embedding provider error: {0}")]
    Embedding(String),

    /// SQL or vector-index failure, surfaced verbatim.
    #[error("storage error: {0}")]
    Storage(String),

    /// Schema rejection of a source configuration.
    #[error("validation error: {0}")]
    Validation(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<tokio_rusqlite::Error> for DocsError {
    fn from(err: tokio_rusqlite::Error) -> Self {
        DocsError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for DocsError {
    fn from(err: serde_json::Error) -> Self {
        DocsError::Validation(err.to_string())
    }
}

impl DocsError {
    /// Whether an in-place retry is worthwhile.
    pub fn is_transient(&self) -> bool {
        matches!(self, DocsError::FetchTransient(_))
    }
}
