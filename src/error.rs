//! Error taxonomy shared by the stores, the insight cache and the request layer.
//!
//! Every variant is recoverable: the server maps each one to an HTTP status
//! (see [`crate::server`]) and the CLI prints it. Nothing here is fatal to the
//! process.

use thiserror::Error;

use crate::generator::GenerationError;

/// Convenience alias used throughout the library.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// `Clone` so one failed computation can be reported to every request
/// waiting on it.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// A slug (or a cache entry / stored blob for it) is absent.
    #[error("not found: {0}")]
    NotFound(String),

    /// Upload collided with a live or retired slug.
    #[error("slug already exists: {slug} (try {suggestion})")]
    AlreadyExists { slug: String, suggestion: String },

    #[error("invalid slug: {0:?}")]
    InvalidSlug(String),

    #[error("unknown insight kind: {0:?}")]
    UnknownInsightKind(String),

    /// Upload with an extension the extractor cannot read.
    #[error("unsupported file: {0}")]
    UnsupportedFile(String),

    /// The document parsed but yielded no text (scanned image PDF, empty file).
    #[error("no text could be extracted from {0}")]
    NoText(String),

    #[error("text extraction failed: {0}")]
    Extraction(#[from] crate::extract::ExtractError),

    #[error(transparent)]
    GenerationFailed(#[from] GenerationError),

    /// A durability write or read of persisted state failed.
    #[error("storage failure: {0}")]
    Storage(String),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Storage(format!("corrupt index: {}", err))
    }
}

impl From<tempfile::PersistError> for Error {
    fn from(err: tempfile::PersistError) -> Self {
        Error::Storage(err.error.to_string())
    }
}
