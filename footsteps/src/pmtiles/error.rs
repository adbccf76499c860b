//! Error types for tile archives and decoding.

use thiserror::Error;

use crate::coord::CoordError;
use crate::source::SourceError;

/// Errors raised while resolving or decoding a tile.
#[derive(Debug, Clone, Error)]
pub enum ArchiveError {
    /// The underlying range read failed.
    #[error(transparent)]
    Source(#[from] SourceError),

    /// The archive header is malformed or of an unsupported version.
    #[error("invalid archive header: {0}")]
    InvalidHeader(String),

    /// A directory could not be decoded.
    #[error("corrupt archive directory: {0}")]
    CorruptDirectory(String),

    /// The archive uses a compression this reader does not support.
    #[error("unsupported compression: {0}")]
    UnsupportedCompression(String),

    /// The tile payload could not be decoded into features.
    #[error("tile decode failed: {0}")]
    Decode(String),

    #[error(transparent)]
    InvalidCoord(#[from] CoordError),
}

impl ArchiveError {
    /// Whether the error is a cancellation.
    pub fn is_abort(&self) -> bool {
        matches!(self, ArchiveError::Source(SourceError::Aborted))
    }

    /// Whether the whole archive is absent at the origin.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ArchiveError::Source(SourceError::NotFound { .. }))
    }

    /// Whether the failure concerns the whole archive rather than one tile.
    ///
    /// Archive-level failures make a layer unavailable; anything else only
    /// leaves a single tile empty.
    pub fn is_archive_level(&self) -> bool {
        match self {
            ArchiveError::Source(SourceError::NotFound { .. })
            | ArchiveError::Source(SourceError::RangeUnsupported { .. })
            | ArchiveError::InvalidHeader(_)
            | ArchiveError::UnsupportedCompression(_) => true,
            ArchiveError::Source(_)
            | ArchiveError::CorruptDirectory(_)
            | ArchiveError::Decode(_)
            | ArchiveError::InvalidCoord(_) => false,
        }
    }

    pub(crate) fn is_etag_mismatch(&self) -> bool {
        matches!(self, ArchiveError::Source(SourceError::EtagMismatch { .. }))
    }
}
