//! Range source abstraction and response validation.

use bytes::Bytes;
use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use super::error::SourceError;

/// Bytes returned by a range read plus the caching headers that came with it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RangeResponse {
    pub data: Bytes,
    /// Strong ETag of the resource. Weak ETags are never reported.
    pub etag: Option<String>,
    pub cache_control: Option<String>,
    pub expires: Option<String>,
}

/// A byte-addressable remote archive.
///
/// Implementations must be cheap to share (`Arc<dyn RangeSource>`) across
/// every layer reading the same archive.
pub trait RangeSource: Send + Sync {
    /// Stable identifier of the archive (usually its URL).
    fn key(&self) -> &str;

    /// Reads `length` bytes starting at `offset`.
    ///
    /// When `known_etag` is given and the origin reports a different strong
    /// ETag, fails with [`SourceError::EtagMismatch`]. A cancelled `cancel`
    /// token resolves to [`SourceError::Aborted`] and drops the transfer.
    fn get_bytes<'a>(
        &'a self,
        offset: u64,
        length: u64,
        cancel: Option<&'a CancellationToken>,
        known_etag: Option<&'a str>,
    ) -> BoxFuture<'a, Result<RangeResponse, SourceError>>;
}

/// Formats the inclusive `Range` header value for a read.
pub fn range_header(offset: u64, length: u64) -> String {
    let end = offset + length.max(1) - 1;
    format!("bytes={}-{}", offset, end)
}

/// Strips weak ETags, which are never used for comparison.
pub fn strong_etag(etag: Option<&str>) -> Option<String> {
    etag.map(str::trim)
        .filter(|e| !e.is_empty() && !e.starts_with("W/"))
        .map(str::to_string)
}

/// Validates a range response before its body is consumed.
///
/// Returns the response's strong ETag on success.
///
/// # Errors
///
/// - [`SourceError::EtagMismatch`] on 416, or when `known_etag` differs
///   from the response's strong ETag
/// - [`SourceError::NotFound`] on 404
/// - [`SourceError::RangeUnsupported`] when a 200 arrives without a
///   Content-Length or with one larger than the requested range
/// - [`SourceError::Status`] on any other non-success status
pub fn validate_range_response(
    url: &str,
    status: u16,
    content_length: Option<u64>,
    etag: Option<&str>,
    requested_length: u64,
    known_etag: Option<&str>,
) -> Result<Option<String>, SourceError> {
    if status == 416 {
        return Err(SourceError::EtagMismatch {
            url: url.to_string(),
        });
    }
    if status == 404 {
        return Err(SourceError::NotFound {
            url: url.to_string(),
        });
    }
    if !(200..300).contains(&status) {
        return Err(SourceError::Status {
            url: url.to_string(),
            status,
        });
    }

    if status == 200 {
        match content_length {
            None => {
                return Err(SourceError::RangeUnsupported {
                    url: url.to_string(),
                    reason: "full-body response without content-length".to_string(),
                })
            }
            Some(len) if len > requested_length => {
                return Err(SourceError::RangeUnsupported {
                    url: url.to_string(),
                    reason: format!(
                        "content-length {} exceeds requested {} bytes",
                        len, requested_length
                    ),
                })
            }
            Some(_) => {}
        }
    }

    let etag = strong_etag(etag);
    if let (Some(known), Some(actual)) = (known_etag, etag.as_deref()) {
        if known != actual {
            return Err(SourceError::EtagMismatch {
                url: url.to_string(),
            });
        }
    }
    Ok(etag)
}

#[cfg(test)]
mod tests {
    use super::*;

    const URL: &str = "http://origin/humans_1000.pmtiles";

    #[test]
    fn test_range_header_is_inclusive() {
        assert_eq!(range_header(100, 100), "bytes=100-199");
        assert_eq!(range_header(0, 16384), "bytes=0-16383");
    }

    #[test]
    fn test_full_body_200_is_range_unsupported() {
        let result = validate_range_response(URL, 200, Some(100_000), None, 100, None);
        assert!(matches!(result, Err(SourceError::RangeUnsupported { .. })));
    }

    #[test]
    fn test_200_without_length_is_range_unsupported() {
        let result = validate_range_response(URL, 200, None, None, 100, None);
        assert!(matches!(result, Err(SourceError::RangeUnsupported { .. })));
    }

    #[test]
    fn test_small_200_within_range_is_accepted() {
        let result = validate_range_response(URL, 200, Some(80), None, 100, None);
        assert_eq!(result.unwrap(), None);
    }

    #[test]
    fn test_etag_mismatch() {
        let result =
            validate_range_response(URL, 206, Some(100), Some("\"Y\""), 100, Some("\"X\""));
        assert!(matches!(result, Err(SourceError::EtagMismatch { .. })));
    }

    #[test]
    fn test_weak_etag_treated_as_absent() {
        let result =
            validate_range_response(URL, 206, Some(100), Some("W/\"Y\""), 100, Some("\"X\""));
        assert_eq!(result.unwrap(), None);
    }

    #[test]
    fn test_416_is_etag_mismatch() {
        let result = validate_range_response(URL, 416, None, None, 100, None);
        assert!(matches!(result, Err(SourceError::EtagMismatch { .. })));
    }

    #[test]
    fn test_matching_etag_is_returned() {
        let result =
            validate_range_response(URL, 206, Some(100), Some("\"X\""), 100, Some("\"X\""));
        assert_eq!(result.unwrap().as_deref(), Some("\"X\""));
    }

    #[test]
    fn test_other_statuses() {
        assert!(matches!(
            validate_range_response(URL, 404, None, None, 100, None),
            Err(SourceError::NotFound { .. })
        ));
        assert!(matches!(
            validate_range_response(URL, 503, None, None, 100, None),
            Err(SourceError::Status { status: 503, .. })
        ));
    }
}
