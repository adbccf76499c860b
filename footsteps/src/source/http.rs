//! HTTP range source backed by reqwest.

use std::sync::atomic::{AtomicU64, Ordering};

use futures::future::BoxFuture;
use reqwest::header::{
    HeaderMap, HeaderName, HeaderValue, ACCEPT_ENCODING, CACHE_CONTROL, CONTENT_LENGTH, ETAG,
    EXPIRES, RANGE,
};
use reqwest::{Client, Url};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::error::SourceError;
use super::range::{range_header, validate_range_response, RangeResponse, RangeSource};

/// Query parameter carrying the range-derived cache-busting key.
pub const CACHE_BUST_PARAM: &str = "r";

/// Hosts allowed to receive cache-busting query parameters.
///
/// Appending a range-derived parameter defeats request coalescing that
/// would otherwise serialize concurrent range reads to one path, but it
/// multiplies cache keys at any shared CDN. It is therefore only applied
/// to loopback hosts and the explicitly trusted (same-origin/proxy) ones.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheBustPolicy {
    trusted_hosts: Vec<String>,
}

impl CacheBustPolicy {
    pub fn new(trusted_hosts: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            trusted_hosts: trusted_hosts
                .into_iter()
                .map(|h| h.into().to_ascii_lowercase())
                .collect(),
        }
    }

    /// Whether `url` points at a host that may receive the parameter.
    pub fn is_trusted(&self, url: &Url) -> bool {
        let Some(host) = url.host_str() else {
            return false;
        };
        let host = host.to_ascii_lowercase();
        matches!(host.as_str(), "localhost" | "127.0.0.1" | "[::1]" | "::1")
            || self.trusted_hosts.iter().any(|h| *h == host)
    }

    /// Appends the range key to a trusted URL; other URLs are returned as-is.
    ///
    /// The key widens with the read: it names the highest byte touched so
    /// far on this source together with the read's own start.
    pub fn apply(&self, url: &Url, offset: u64, high_water: u64) -> Url {
        if !self.is_trusted(url) {
            return url.clone();
        }
        let mut busted = url.clone();
        busted
            .query_pairs_mut()
            .append_pair(CACHE_BUST_PARAM, &format!("{}-{}", offset, high_water));
        busted
    }
}

/// Reads byte ranges from an archive over HTTP.
#[derive(Debug)]
pub struct HttpRangeSource {
    client: Client,
    url: Url,
    key: String,
    headers: HeaderMap,
    cache_bust: Option<CacheBustPolicy>,
    high_water: AtomicU64,
}

impl HttpRangeSource {
    /// Creates a source sharing `client`.
    pub fn new(client: Client, url: &str) -> Result<Self, SourceError> {
        let parsed = Url::parse(url).map_err(|e| SourceError::Http {
            url: url.to_string(),
            reason: format!("invalid URL: {}", e),
        })?;
        Ok(Self {
            client,
            key: parsed.to_string(),
            url: parsed,
            headers: HeaderMap::new(),
            cache_bust: None,
            high_water: AtomicU64::new(0),
        })
    }

    /// Adds a header (e.g. `Authorization`) sent with every read.
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Enables range-derived cache busting for trusted hosts.
    pub fn with_cache_bust(mut self, policy: CacheBustPolicy) -> Self {
        self.cache_bust = Some(policy);
        self
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    fn request_url(&self, offset: u64, length: u64) -> Url {
        match &self.cache_bust {
            Some(policy) => {
                let end = offset + length.max(1) - 1;
                let high_water = self.high_water.fetch_max(end, Ordering::Relaxed).max(end);
                policy.apply(&self.url, offset, high_water)
            }
            None => self.url.clone(),
        }
    }

    async fn fetch(
        &self,
        offset: u64,
        length: u64,
        known_etag: Option<&str>,
    ) -> Result<RangeResponse, SourceError> {
        let url = self.request_url(offset, length);
        trace!(url = %url, offset, length, "Range read");

        let response = self
            .client
            .get(url.clone())
            .headers(self.headers.clone())
            .header(RANGE, range_header(offset, length))
            .header(ACCEPT_ENCODING, "identity")
            .send()
            .await
            .map_err(|e| SourceError::Http {
                url: self.key.clone(),
                reason: e.to_string(),
            })?;

        let headers = response.headers();
        let content_length = header_str(headers, &CONTENT_LENGTH).and_then(|v| v.parse().ok());
        let etag = validate_range_response(
            &self.key,
            response.status().as_u16(),
            content_length,
            header_str(headers, &ETAG),
            length,
            known_etag,
        )?;
        let cache_control = header_str(headers, &CACHE_CONTROL).map(str::to_string);
        let expires = header_str(headers, &EXPIRES).map(str::to_string);

        let data = response.bytes().await.map_err(|e| SourceError::Http {
            url: self.key.clone(),
            reason: format!("failed to read body: {}", e),
        })?;

        debug!(url = %self.key, offset, bytes = data.len(), "Range read complete");
        Ok(RangeResponse {
            data,
            etag,
            cache_control,
            expires,
        })
    }
}

impl RangeSource for HttpRangeSource {
    fn key(&self) -> &str {
        &self.key
    }

    fn get_bytes<'a>(
        &'a self,
        offset: u64,
        length: u64,
        cancel: Option<&'a CancellationToken>,
        known_etag: Option<&'a str>,
    ) -> BoxFuture<'a, Result<RangeResponse, SourceError>> {
        Box::pin(async move {
            match cancel {
                Some(token) => {
                    if token.is_cancelled() {
                        return Err(SourceError::Aborted);
                    }
                    // Dropping the fetch future on cancellation aborts the transfer.
                    tokio::select! {
                        biased;
                        _ = token.cancelled() => Err(SourceError::Aborted),
                        result = self.fetch(offset, length, known_etag) => result,
                    }
                }
                None => self.fetch(offset, length, known_etag).await,
            }
        })
    }
}

fn header_str<'h>(headers: &'h HeaderMap, name: &HeaderName) -> Option<&'h str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_cache_bust_only_for_trusted_hosts() {
        let policy = CacheBustPolicy::new(["tiles.example.org"]);
        assert!(policy.is_trusted(&url("http://localhost:8080/a.pmtiles")));
        assert!(policy.is_trusted(&url("https://TILES.example.org/a.pmtiles")));
        assert!(!policy.is_trusted(&url("https://cdn.example.net/a.pmtiles")));

        let untouched = policy.apply(&url("https://cdn.example.net/a.pmtiles"), 0, 99);
        assert_eq!(untouched.query(), None);
    }

    #[test]
    fn test_cache_bust_appends_range_key() {
        let policy = CacheBustPolicy::default();
        let busted = policy.apply(&url("http://127.0.0.1:9000/a.pmtiles?v=2"), 100, 199);
        assert_eq!(busted.query(), Some("v=2&r=100-199"));
    }

    #[test]
    fn test_request_url_widens_monotonically() {
        let source = HttpRangeSource::new(Client::new(), "http://localhost/a.pmtiles")
            .unwrap()
            .with_cache_bust(CacheBustPolicy::default());

        let first = source.request_url(1000, 100);
        let second = source.request_url(0, 10);
        assert_eq!(first.query(), Some("r=1000-1099"));
        assert_eq!(second.query(), Some("r=0-1099"));
    }

    #[test]
    fn test_invalid_url_rejected() {
        let result = HttpRangeSource::new(Client::new(), "not a url");
        assert!(matches!(result, Err(SourceError::Http { .. })));
    }

    #[tokio::test]
    async fn test_pre_cancelled_token_aborts_without_request() {
        let source = HttpRangeSource::new(Client::new(), "http://127.0.0.1:9/a.pmtiles").unwrap();
        let token = CancellationToken::new();
        token.cancel();

        let result = source.get_bytes(0, 10, Some(&token), None).await;
        assert!(matches!(result, Err(SourceError::Aborted)));
    }
}
