//! MBTiles extraction service.
//!
//! Resolves `(year, lod)` to a local SQLite archive and extracts one tile.
//!
//! ```text
//! get_tile(year, lod, z/x/y)
//!   │ resolve: humans_{year}.mbtiles, then humans_{year}_lod_{lod}.mbtiles
//!   │          (a year without a combined archive goes straight to per-LOD)
//!   │          remote origin → DownloadCache (hit / refresh / miss)
//!   │          local origin  → file in the directory
//!   ▼
//! extractors in order (sqlx, then sqlite3 CLI) ── first success wins
//!   ▼
//! MbtilesTile { bytes, gzip?, etag = "{mtime}-{lod}-{z}-{x}-{y}" }
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use dashmap::DashSet;
use tracing::{debug, info, warn};

use super::download::{CacheStatus, DownloadCache};
use super::error::{MbtilesError, MbtilesResult};
use super::extract::TileExtractor;
use super::naming::MBTILES_EXTENSION;
use crate::coord::{TileCoord, Year};
use crate::lod::Lod;
use crate::pmtiles::{is_gzip, ArchiveShape};

/// Where archives come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MbtilesOrigin {
    /// Base URL; archives are downloaded into the cache.
    Remote(String),
    /// Directory holding the archives.
    Local(PathBuf),
}

impl MbtilesOrigin {
    /// Interprets `value` as a URL when it has an http(s) scheme, otherwise
    /// as a directory.
    pub fn parse(value: &str) -> Self {
        if value.starts_with("http://") || value.starts_with("https://") {
            MbtilesOrigin::Remote(value.trim_end_matches('/').to_string())
        } else {
            MbtilesOrigin::Local(PathBuf::from(value))
        }
    }
}

/// An extracted tile ready to serve.
#[derive(Debug, Clone)]
pub struct MbtilesTile {
    pub data: Bytes,
    /// Payload is gzip-compressed (served with `Content-Encoding: gzip`).
    pub gzip: bool,
    pub etag: String,
    pub modified: SystemTime,
    /// `None` for archives read from a local directory.
    pub cache_status: Option<CacheStatus>,
}

struct ResolvedArchive {
    path: PathBuf,
    modified: SystemTime,
    cache_status: Option<CacheStatus>,
}

/// Serves single tiles out of SQLite archives.
pub struct MbtilesService {
    origin: MbtilesOrigin,
    downloads: Arc<DownloadCache>,
    extractors: Vec<Arc<dyn TileExtractor>>,
    missing_combined: DashSet<Year>,
}

impl std::fmt::Debug for MbtilesService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MbtilesService")
            .field("origin", &self.origin)
            .field(
                "extractors",
                &self.extractors.iter().map(|e| e.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl MbtilesService {
    pub fn new(
        origin: MbtilesOrigin,
        downloads: Arc<DownloadCache>,
        extractors: Vec<Arc<dyn TileExtractor>>,
    ) -> Self {
        Self {
            origin,
            downloads,
            extractors,
            missing_combined: DashSet::new(),
        }
    }

    pub fn origin(&self) -> &MbtilesOrigin {
        &self.origin
    }

    pub fn downloads(&self) -> &Arc<DownloadCache> {
        &self.downloads
    }

    /// Extracts one tile.
    ///
    /// # Errors
    ///
    /// - [`MbtilesError::NotFound`] when no archive exists for the year or
    ///   the archive has no row for the tile
    /// - [`MbtilesError::DownloadFailure`] when the archive cannot be cached
    /// - [`MbtilesError::ExtractionFailure`] when every strategy failed
    pub async fn get_tile(&self, year: Year, lod: Lod, coord: TileCoord) -> MbtilesResult<MbtilesTile> {
        let archive = self.resolve(year, lod).await?;

        let data = self
            .extract(&archive.path, coord)
            .await?
            .ok_or_else(|| MbtilesError::NotFound(format!("{}/{} at {}", year, lod, coord)))?;

        let modified_secs = archive
            .modified
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let etag = tile_etag(modified_secs, lod, coord);
        debug!(year, lod = %lod, tile = %coord, bytes = data.len(), "Extracted tile");

        Ok(MbtilesTile {
            gzip: is_gzip(&data),
            data: Bytes::from(data),
            etag,
            modified: archive.modified,
            cache_status: archive.cache_status,
        })
    }

    async fn resolve(&self, year: Year, lod: Lod) -> MbtilesResult<ResolvedArchive> {
        if !self.missing_combined.contains(&year) {
            let name = ArchiveShape::Combined.file_name(year, MBTILES_EXTENSION);
            match self.resolve_named(&name).await {
                Err(MbtilesError::NotFound(_)) => {
                    info!(year, "No combined archive, using per-LOD archives");
                    self.missing_combined.insert(year);
                }
                other => return other,
            }
        }

        let name = ArchiveShape::PerLod(lod).file_name(year, MBTILES_EXTENSION);
        self.resolve_named(&name).await
    }

    async fn resolve_named(&self, name: &str) -> MbtilesResult<ResolvedArchive> {
        match &self.origin {
            MbtilesOrigin::Remote(base) => {
                let cached = self.downloads.fetch(&format!("{}/{}", base, name)).await?;
                Ok(ResolvedArchive {
                    path: cached.path,
                    modified: cached.modified,
                    cache_status: Some(cached.status),
                })
            }
            MbtilesOrigin::Local(dir) => {
                let path = dir.join(name);
                let metadata = match tokio::fs::metadata(&path).await {
                    Ok(metadata) => metadata,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                        return Err(MbtilesError::NotFound(path.display().to_string()))
                    }
                    Err(e) => return Err(e.into()),
                };
                Ok(ResolvedArchive {
                    path,
                    modified: metadata.modified().unwrap_or(UNIX_EPOCH),
                    cache_status: None,
                })
            }
        }
    }

    async fn extract(&self, path: &std::path::Path, coord: TileCoord) -> MbtilesResult<Option<Vec<u8>>> {
        let mut failures = Vec::new();
        for extractor in &self.extractors {
            match extractor.extract(path, coord).await {
                Ok(found) => return Ok(found),
                Err(e) => {
                    warn!(extractor = extractor.name(), tile = %coord, error = %e, "Extractor failed, trying next");
                    failures.push(format!("{}: {}", extractor.name(), e));
                }
            }
        }
        Err(MbtilesError::ExtractionFailure(if failures.is_empty() {
            "no extractors configured".to_string()
        } else {
            failures.join("; ")
        }))
    }
}

/// ETag of a tile: changes whenever the archive does.
pub fn tile_etag(modified_secs: u64, lod: Lod, coord: TileCoord) -> String {
    format!(
        "\"{}-{}-{}-{}-{}\"",
        modified_secs,
        lod.level(),
        coord.z,
        coord.x,
        coord.y
    )
}
