//! Range source for remote tile archives.
//!
//! Performs cache-aware byte-range reads against an indexed tile archive.
//! Every read asks for `identity` content-coding so offsets stay stable, and
//! the response is validated before its body is trusted:
//!
//! ```text
//! GET archive  Range: bytes=a-b  Accept-Encoding: identity
//!   206 ─────────────────────────────► data (+ strong ETag)
//!   200 without/oversized length ────► RangeUnsupported
//!   416 or strong ETag != known ─────► EtagMismatch
//!   cancelled ───────────────────────► Aborted (never cached, never logged)
//! ```

mod error;
mod http;
mod memory;
mod range;

pub use error::SourceError;
pub use http::{CacheBustPolicy, HttpRangeSource, CACHE_BUST_PARAM};
pub use memory::MemoryRangeSource;
pub use range::{
    range_header, strong_etag, validate_range_response, RangeResponse, RangeSource,
};
