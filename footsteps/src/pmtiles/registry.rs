//! Archive handle registry.
//!
//! One [`TileArchive`] per `(origin, year, shape)`, created on first use and
//! kept in a bounded cache so that every layer showing a year shares its
//! index. Two serving shapes exist:
//!
//! ```text
//! combined  {origin}/humans_{year}.pmtiles          (tried first)
//! per-LOD   {origin}/humans_{year}_lod_{lod}.pmtiles (fallback)
//! ```
//!
//! Once a combined archive answers 404 the registry remembers it and goes
//! straight to the per-LOD shape for that year.

use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashSet;
use futures::future::BoxFuture;
use moka::future::Cache;
use reqwest::Client;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::archive::{TileArchive, TileData};
use super::error::ArchiveError;
use crate::coord::{TileCoord, Year};
use crate::lod::Lod;
use crate::source::{CacheBustPolicy, HttpRangeSource, MemoryRangeSource, RangeSource, SourceError};

/// Archive handles kept at once.
pub const DEFAULT_ARCHIVE_CAPACITY: u64 = 32;

/// File-name prefix of every settlement archive.
pub const ARCHIVE_PREFIX: &str = "humans";

/// Archive file extension.
pub const ARCHIVE_EXTENSION: &str = "pmtiles";

/// How a year's tiles are split across archives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArchiveShape {
    /// All levels of detail in one archive.
    Combined,
    /// One archive per level of detail.
    PerLod(Lod),
}

impl ArchiveShape {
    /// File name of the archive holding `year` in this shape.
    pub fn file_name(&self, year: Year, extension: &str) -> String {
        match self {
            ArchiveShape::Combined => format!("{}_{}.{}", ARCHIVE_PREFIX, year, extension),
            ArchiveShape::PerLod(lod) => {
                format!("{}_{}_lod_{}.{}", ARCHIVE_PREFIX, year, lod.level(), extension)
            }
        }
    }
}

/// Identity of one archive handle.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArchiveId {
    pub origin: Arc<str>,
    pub year: Year,
    pub shape: ArchiveShape,
}

impl ArchiveId {
    pub fn new(origin: impl Into<Arc<str>>, year: Year, shape: ArchiveShape) -> Self {
        Self {
            origin: origin.into(),
            year,
            shape,
        }
    }

    /// Location of the archive under its origin.
    pub fn location(&self) -> String {
        format!(
            "{}/{}",
            self.origin.trim_end_matches('/'),
            self.shape.file_name(self.year, ARCHIVE_EXTENSION)
        )
    }
}

/// Opens range sources for archive locations.
pub trait SourceFactory: Send + Sync {
    fn open<'a>(
        &'a self,
        location: &'a str,
    ) -> BoxFuture<'a, Result<Arc<dyn RangeSource>, SourceError>>;
}

/// Opens HTTP range sources sharing one client.
#[derive(Debug, Clone)]
pub struct HttpSourceFactory {
    client: Client,
    cache_bust: Option<CacheBustPolicy>,
}

impl HttpSourceFactory {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            cache_bust: None,
        }
    }

    pub fn with_cache_bust(mut self, policy: CacheBustPolicy) -> Self {
        self.cache_bust = Some(policy);
        self
    }
}

impl SourceFactory for HttpSourceFactory {
    fn open<'a>(
        &'a self,
        location: &'a str,
    ) -> BoxFuture<'a, Result<Arc<dyn RangeSource>, SourceError>> {
        Box::pin(async move {
            let mut source = HttpRangeSource::new(self.client.clone(), location)?;
            if let Some(policy) = &self.cache_bust {
                source = source.with_cache_bust(policy.clone());
            }
            Ok(Arc::new(source) as Arc<dyn RangeSource>)
        })
    }
}

/// Opens archives from local files, reading each one into memory.
#[derive(Debug, Clone, Default)]
pub struct LocalSourceFactory;

impl SourceFactory for LocalSourceFactory {
    fn open<'a>(
        &'a self,
        location: &'a str,
    ) -> BoxFuture<'a, Result<Arc<dyn RangeSource>, SourceError>> {
        Box::pin(async move {
            let source = MemoryRangeSource::from_file(&PathBuf::from(location)).await?;
            Ok(Arc::new(source) as Arc<dyn RangeSource>)
        })
    }
}

/// Process-wide registry of archive handles.
pub struct ArchiveRegistry {
    factory: Arc<dyn SourceFactory>,
    handles: Cache<ArchiveId, Arc<TileArchive>>,
    missing_combined: DashSet<(Arc<str>, Year)>,
}

impl ArchiveRegistry {
    pub fn new(factory: Arc<dyn SourceFactory>) -> Self {
        Self::with_capacity(factory, DEFAULT_ARCHIVE_CAPACITY)
    }

    pub fn with_capacity(factory: Arc<dyn SourceFactory>, capacity: u64) -> Self {
        Self {
            factory,
            handles: Cache::builder().max_capacity(capacity).build(),
            missing_combined: DashSet::new(),
        }
    }

    /// Returns the handle for `id`, opening it on first use.
    ///
    /// Concurrent first calls for the same id share one open.
    pub async fn archive(&self, id: &ArchiveId) -> Result<Arc<TileArchive>, ArchiveError> {
        let factory = Arc::clone(&self.factory);
        let location = id.location();
        self.handles
            .try_get_with(id.clone(), async move {
                debug!(archive = %location, "Opening archive");
                let source = factory.open(&location).await?;
                Ok::<_, ArchiveError>(Arc::new(TileArchive::new(source)))
            })
            .await
            .map_err(|e| (*e).clone())
    }

    /// Reads one tile of `year` at `lod`, trying the combined archive first.
    pub async fn get_tile(
        &self,
        origin: &Arc<str>,
        year: Year,
        lod: Lod,
        coord: TileCoord,
        cancel: Option<&CancellationToken>,
    ) -> Result<Option<TileData>, ArchiveError> {
        let missing_key = (Arc::clone(origin), year);
        if !self.missing_combined.contains(&missing_key) {
            let combined = ArchiveId::new(Arc::clone(origin), year, ArchiveShape::Combined);
            match self.try_archive(&combined, coord, cancel).await {
                Err(e) if e.is_not_found() => {
                    info!(origin = %origin, year, "No combined archive, using per-LOD archives");
                    self.missing_combined.insert(missing_key);
                    self.handles.invalidate(&combined).await;
                }
                other => return other,
            }
        }

        let per_lod = ArchiveId::new(Arc::clone(origin), year, ArchiveShape::PerLod(lod));
        self.try_archive(&per_lod, coord, cancel).await
    }

    /// Number of open handles.
    pub fn len(&self) -> u64 {
        self.handles.entry_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    async fn try_archive(
        &self,
        id: &ArchiveId,
        coord: TileCoord,
        cancel: Option<&CancellationToken>,
    ) -> Result<Option<TileData>, ArchiveError> {
        self.archive(id).await?.get_tile(coord, cancel).await
    }
}
