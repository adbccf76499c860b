//! Error types for the MBTiles extraction service.

use thiserror::Error;

/// Errors returned by the extraction service.
#[derive(Debug, Error)]
pub enum MbtilesError {
    /// No archive for the year, or no tile at the coordinate.
    #[error("not found: {0}")]
    NotFound(String),

    /// Every extraction strategy failed.
    #[error("tile extraction failed: {0}")]
    ExtractionFailure(String),

    /// The remote archive could not be fetched into the local cache.
    #[error("archive download failed: {0}")]
    DownloadFailure(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An extraction strategy cannot run in this environment.
    #[error("extractor unavailable: {0}")]
    Unavailable(String),
}

impl MbtilesError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, MbtilesError::NotFound(_))
    }
}

/// Result type for MBTiles operations.
pub type MbtilesResult<T> = Result<T, MbtilesError>;
