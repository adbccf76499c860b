//! `/tiles/{year}/{lod}/{z}/{x}/{y}` served from SQLite archives.

use axum::body::Body;
use axum::http::header::{
    HeaderMap, HeaderName, HeaderValue, CACHE_CONTROL, CONTENT_ENCODING, CONTENT_TYPE, ETAG,
    IF_NONE_MATCH, LAST_MODIFIED,
};
use axum::http::StatusCode;
use axum::response::Response;

use super::error::ServerError;
use crate::coord::{TileCoord, Year};
use crate::lod::Lod;
use crate::mbtiles::{format_http_date, MbtilesService, MbtilesTile};

/// Content type of vector tiles.
pub const TILE_CONTENT_TYPE: &str = "application/x-protobuf";

/// Same contract as proxied tiles. Forced reloads revalidate through the ETag.
pub const TILE_CACHE_CONTROL: &str = super::proxy::IMMUTABLE_CACHE_CONTROL;

/// Reports how the archive behind a tile was obtained.
pub static X_CACHE_STATUS: HeaderName = HeaderName::from_static("x-cache-status");

/// Raw path segments of a tile request.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct TilePath {
    pub year: Year,
    pub lod: u8,
    pub z: u8,
    pub x: u32,
    /// Row, optionally suffixed with `.pbf` or `.mvt`.
    pub y: String,
}

impl TilePath {
    /// Validates the segments.
    pub fn parse(&self) -> Result<(Year, Lod, TileCoord), ServerError> {
        let lod = Lod::new(self.lod)
            .ok_or_else(|| ServerError::BadRequest(format!("unknown lod {}", self.lod)))?;
        let row = self
            .y
            .strip_suffix(".pbf")
            .or_else(|| self.y.strip_suffix(".mvt"))
            .unwrap_or(&self.y);
        let y: u32 = row
            .parse()
            .map_err(|_| ServerError::BadRequest(format!("invalid row '{}'", self.y)))?;
        let coord = TileCoord::new(self.z, self.x, y)
            .map_err(|e| ServerError::BadRequest(e.to_string()))?;
        Ok((self.year, lod, coord))
    }
}

/// Serves one tile, answering `304` when `If-None-Match` matches.
pub async fn serve_tile(
    service: &MbtilesService,
    path: &TilePath,
    request_headers: &HeaderMap,
) -> Result<Response, ServerError> {
    let (year, lod, coord) = path.parse()?;
    let tile = service.get_tile(year, lod, coord).await?;

    if etag_matches(request_headers, &tile.etag) {
        let mut response = Response::new(Body::empty());
        *response.status_mut() = StatusCode::NOT_MODIFIED;
        insert_validators(response.headers_mut(), &tile);
        return Ok(response);
    }

    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(TILE_CONTENT_TYPE));
    if tile.gzip {
        headers.insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
    }
    insert_validators(&mut headers, &tile);

    let mut response = Response::new(Body::from(tile.data));
    *response.headers_mut() = headers;
    Ok(response)
}

fn insert_validators(headers: &mut HeaderMap, tile: &MbtilesTile) {
    if let Ok(etag) = HeaderValue::from_str(&tile.etag) {
        headers.insert(ETAG, etag);
    }
    if let Ok(modified) = HeaderValue::from_str(&format_http_date(tile.modified)) {
        headers.insert(LAST_MODIFIED, modified);
    }
    headers.insert(CACHE_CONTROL, HeaderValue::from_static(TILE_CACHE_CONTROL));
    if let Some(status) = tile.cache_status {
        headers.insert(X_CACHE_STATUS.clone(), HeaderValue::from_static(status.as_str()));
    }
}

/// Whether `If-None-Match` names `etag` (weak comparison) or is `*`.
pub fn etag_matches(headers: &HeaderMap, etag: &str) -> bool {
    let strip = |tag: &str| tag.trim().trim_start_matches("W/").to_string();
    let wanted = strip(etag);
    headers.get_all(IF_NONE_MATCH).iter().any(|value| {
        value.to_str().map_or(false, |value| {
            value
                .split(',')
                .any(|candidate| candidate.trim() == "*" || strip(candidate) == wanted)
        })
    })
}
