//! Stateless tile origin proxy.
//!
//! ```text
//! GET|HEAD /proxy/{path}?{query}
//!   → upstream/{path}?{query}
//!       Range: forwarded verbatim
//!       Accept-Encoding: identity
//!       Cache-Control: no-cache
//!   ← status + allow-listed headers
//!       Vary: Range (merged with upstream Vary)
//!       Cache-Control: public, max-age=31536000, immutable
//! ```

use axum::body::Body;
use axum::http::header::{
    HeaderMap, HeaderName, HeaderValue, ACCEPT_ENCODING, ACCEPT_RANGES, CACHE_CONTROL,
    CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, ETAG, EXPIRES, LAST_MODIFIED, RANGE, VARY,
};
use axum::http::{Method, StatusCode};
use axum::response::Response;
use reqwest::Client;
use tracing::debug;

use super::error::ServerError;

/// Cache policy set on every proxied response.
pub const IMMUTABLE_CACHE_CONTROL: &str = "public, max-age=31536000, immutable";

/// Upstream response headers passed through to the client.
pub const FORWARDED_HEADERS: [HeaderName; 7] = [
    CONTENT_TYPE,
    CONTENT_RANGE,
    ACCEPT_RANGES,
    CONTENT_LENGTH,
    ETAG,
    LAST_MODIFIED,
    EXPIRES,
];

/// Forwards requests to one upstream.
#[derive(Debug, Clone)]
pub struct TileProxy {
    client: Client,
    upstream: String,
}

impl TileProxy {
    pub fn new(client: Client, upstream: &str) -> Self {
        Self {
            client,
            upstream: upstream.trim_end_matches('/').to_string(),
        }
    }

    pub fn upstream(&self) -> &str {
        &self.upstream
    }

    /// Upstream URL for a proxied path and query.
    pub fn upstream_url(&self, path: &str, query: Option<&str>) -> String {
        let path = path.trim_start_matches('/');
        match query.filter(|q| !q.is_empty()) {
            Some(query) => format!("{}/{}?{}", self.upstream, path, query),
            None => format!("{}/{}", self.upstream, path),
        }
    }

    /// Forwards one request. Only GET and HEAD reach this point.
    pub async fn forward(
        &self,
        method: Method,
        path: &str,
        query: Option<&str>,
        headers: &HeaderMap,
    ) -> Result<Response, ServerError> {
        let url = self.upstream_url(path, query);
        let head = method == Method::HEAD;

        let mut request = if head {
            self.client.head(&url)
        } else {
            self.client.get(&url)
        }
        .header(ACCEPT_ENCODING, "identity")
        .header(CACHE_CONTROL, "no-cache");
        if let Some(range) = headers.get(RANGE) {
            request = request.header(RANGE, range.clone());
        }

        let upstream = request
            .send()
            .await
            .map_err(|e| ServerError::Upstream(format!("{}: {}", url, e)))?;
        let status = upstream.status();
        let response_headers = forwarded_headers(status, upstream.headers());
        debug!(%method, url = %url, status = status.as_u16(), "Proxied");

        let body = if head {
            Body::empty()
        } else {
            let bytes = upstream
                .bytes()
                .await
                .map_err(|e| ServerError::Upstream(format!("{}: {}", url, e)))?;
            Body::from(bytes)
        };

        Ok(build_response(status, response_headers, body))
    }
}

fn build_response(status: StatusCode, headers: HeaderMap, body: Body) -> Response {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

/// Copies the allow-listed headers and adds the proxy's own.
///
/// Only successful responses are marked immutable; errors are not stored.
pub fn forwarded_headers(status: StatusCode, upstream: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for name in FORWARDED_HEADERS.iter() {
        if let Some(value) = upstream.get(name) {
            headers.insert(name.clone(), value.clone());
        }
    }
    headers.insert(VARY, merge_vary(upstream));
    let cache_control = if status.is_success() || status == StatusCode::NOT_MODIFIED {
        IMMUTABLE_CACHE_CONTROL
    } else {
        "no-store"
    };
    headers.insert(CACHE_CONTROL, HeaderValue::from_static(cache_control));
    headers
}

/// Upstream `Vary` values plus `Range`, without duplicates.
fn merge_vary(upstream: &HeaderMap) -> HeaderValue {
    let mut fields: Vec<String> = Vec::new();
    for value in upstream.get_all(VARY) {
        let Ok(value) = value.to_str() else { continue };
        for field in value.split(',').map(str::trim).filter(|f| !f.is_empty()) {
            if !fields.iter().any(|f| f.eq_ignore_ascii_case(field)) {
                fields.push(field.to_string());
            }
        }
    }
    if !fields.iter().any(|f| f.eq_ignore_ascii_case("range")) {
        fields.push("Range".to_string());
    }
    HeaderValue::from_str(&fields.join(", ")).unwrap_or(HeaderValue::from_static("Range"))
}
