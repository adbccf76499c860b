//! Lazily indexed tile archive.
//!
//! A [`TileArchive`] owns the header and root directory of one remote
//! archive. They are fetched on first access with a single initial read,
//! then reused for every lookup:
//!
//! ```text
//! get_tile(z/x/y)
//!   │ index() ── first call: GET 0..16384 → header + root directory
//!   ▼
//! root ──find_tile──► tile entry ──► GET tile_data_offset + entry.offset
//!   │                     ▲
//!   └── leaf entry ───► leaf (LRU) ── up to three levels deep
//! ```
//!
//! Every read after the first carries the archive's strong ETag. If the
//! origin reports a different one, the index is dropped, re-read from
//! offset 0 and the lookup is retried once.

use std::num::NonZeroUsize;
use std::sync::Arc;

use bytes::Bytes;
use lru::LruCache;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::directory::{deserialize_directory, find_tile, Entry, MAX_DIRECTORY_DEPTH};
use super::error::ArchiveError;
use super::header::{Compression, Header, TileType, HEADER_SIZE, INITIAL_READ_LENGTH};
use super::tile_id::zxy_to_tile_id;
use crate::coord::TileCoord;
use crate::source::RangeSource;

/// Leaf directories kept per archive.
pub const DEFAULT_LEAF_CACHE_SIZE: usize = 64;

/// Raw tile bytes as stored in the archive, plus how to interpret them.
#[derive(Debug, Clone, PartialEq)]
pub struct TileData {
    pub data: Bytes,
    pub compression: Compression,
    pub tile_type: TileType,
    pub cache_control: Option<String>,
    pub expires: Option<String>,
}

#[derive(Debug)]
struct ArchiveIndex {
    header: Header,
    root: Arc<Vec<Entry>>,
    etag: Option<String>,
}

/// Handle to one remote archive.
pub struct TileArchive {
    source: Arc<dyn RangeSource>,
    index: tokio::sync::Mutex<Option<Arc<ArchiveIndex>>>,
    leaves: Mutex<LruCache<u64, Arc<Vec<Entry>>>>,
}

impl std::fmt::Debug for TileArchive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TileArchive")
            .field("source", &self.source.key())
            .finish_non_exhaustive()
    }
}

impl TileArchive {
    pub fn new(source: Arc<dyn RangeSource>) -> Self {
        Self::with_leaf_cache_size(source, DEFAULT_LEAF_CACHE_SIZE)
    }

    pub fn with_leaf_cache_size(source: Arc<dyn RangeSource>, size: usize) -> Self {
        let size = NonZeroUsize::new(size).unwrap_or(NonZeroUsize::MIN);
        Self {
            source,
            index: tokio::sync::Mutex::new(None),
            leaves: Mutex::new(LruCache::new(size)),
        }
    }

    /// Identifier of the underlying source.
    pub fn key(&self) -> &str {
        self.source.key()
    }

    /// Returns the archive header, reading it if needed.
    pub async fn header(&self, cancel: Option<&CancellationToken>) -> Result<Header, ArchiveError> {
        Ok(self.index(cancel).await?.header.clone())
    }

    /// Reads the archive's JSON metadata.
    pub async fn metadata(
        &self,
        cancel: Option<&CancellationToken>,
    ) -> Result<serde_json::Value, ArchiveError> {
        let index = self.index(cancel).await?;
        let header = &index.header;
        if header.metadata_length == 0 {
            return Ok(serde_json::Value::Null);
        }
        let response = self
            .source
            .get_bytes(
                header.metadata_offset,
                header.metadata_length,
                cancel,
                index.etag.as_deref(),
            )
            .await?;
        let raw = header.internal_compression.decompress(&response.data)?;
        serde_json::from_slice(&raw).map_err(|e| ArchiveError::Decode(format!("metadata: {}", e)))
    }

    /// Looks up a tile. `Ok(None)` means the archive has no data there.
    pub async fn get_tile(
        &self,
        coord: TileCoord,
        cancel: Option<&CancellationToken>,
    ) -> Result<Option<TileData>, ArchiveError> {
        match self.lookup(coord, cancel).await {
            Err(e) if e.is_etag_mismatch() => {
                warn!(archive = %self.key(), tile = %coord, "Archive changed, re-reading index");
                self.invalidate().await;
                self.lookup(coord, cancel).await
            }
            other => other,
        }
    }

    /// Drops the cached header and directories.
    pub async fn invalidate(&self) {
        *self.index.lock().await = None;
        self.leaves.lock().clear();
    }

    async fn lookup(
        &self,
        coord: TileCoord,
        cancel: Option<&CancellationToken>,
    ) -> Result<Option<TileData>, ArchiveError> {
        let tile_id = zxy_to_tile_id(coord)?;
        let index = self.index(cancel).await?;
        let header = &index.header;
        if coord.z < header.min_zoom || coord.z > header.max_zoom {
            trace!(tile = %coord, "Outside archive zoom range");
            return Ok(None);
        }

        let mut entries = Arc::clone(&index.root);
        for _ in 0..MAX_DIRECTORY_DEPTH {
            let Some(entry) = find_tile(&entries, tile_id).copied() else {
                return Ok(None);
            };

            if !entry.is_leaf() {
                let response = self
                    .source
                    .get_bytes(
                        header.tile_data_offset + entry.offset,
                        u64::from(entry.length),
                        cancel,
                        index.etag.as_deref(),
                    )
                    .await?;
                trace!(tile = %coord, bytes = response.data.len(), "Tile read");
                return Ok(Some(TileData {
                    data: response.data,
                    compression: header.tile_compression,
                    tile_type: header.tile_type,
                    cache_control: response.cache_control,
                    expires: response.expires,
                }));
            }

            entries = self
                .leaf(&index, header.leaf_dirs_offset + entry.offset, entry.length, cancel)
                .await?;
        }

        Err(ArchiveError::CorruptDirectory(format!(
            "directory nesting deeper than {} levels",
            MAX_DIRECTORY_DEPTH
        )))
    }

    async fn index(
        &self,
        cancel: Option<&CancellationToken>,
    ) -> Result<Arc<ArchiveIndex>, ArchiveError> {
        // Held across the read so concurrent first lookups share one fetch.
        let mut slot = self.index.lock().await;
        if let Some(index) = slot.as_ref() {
            return Ok(Arc::clone(index));
        }

        let initial = self
            .source
            .get_bytes(0, INITIAL_READ_LENGTH, cancel, None)
            .await?;
        let header = Header::parse(&initial.data)?;

        let root_start = header.root_dir_offset;
        let root_end = root_start + header.root_dir_length;
        let root_raw = if root_start >= HEADER_SIZE as u64 && root_end <= initial.data.len() as u64
        {
            initial.data.slice(root_start as usize..root_end as usize)
        } else {
            debug!(archive = %self.key(), "Root directory outside initial read");
            self.source
                .get_bytes(root_start, header.root_dir_length, cancel, initial.etag.as_deref())
                .await?
                .data
        };
        let root = deserialize_directory(&header.internal_compression.decompress(&root_raw)?)?;

        debug!(
            archive = %self.key(),
            entries = root.len(),
            min_zoom = header.min_zoom,
            max_zoom = header.max_zoom,
            "Archive index loaded"
        );

        let index = Arc::new(ArchiveIndex {
            header,
            root: Arc::new(root),
            etag: initial.etag,
        });
        *slot = Some(Arc::clone(&index));
        Ok(index)
    }

    async fn leaf(
        &self,
        index: &ArchiveIndex,
        offset: u64,
        length: u32,
        cancel: Option<&CancellationToken>,
    ) -> Result<Arc<Vec<Entry>>, ArchiveError> {
        if let Some(entries) = self.leaves.lock().get(&offset) {
            return Ok(Arc::clone(entries));
        }

        let response = self
            .source
            .get_bytes(offset, u64::from(length), cancel, index.etag.as_deref())
            .await?;
        let entries = Arc::new(deserialize_directory(
            &index.header.internal_compression.decompress(&response.data)?,
        )?);
        self.leaves.lock().put(offset, Arc::clone(&entries));
        Ok(entries)
    }
}
