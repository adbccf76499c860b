//! Decoded tile cache.
//!
//! A single [`FeatureCache`] is shared by every layer so that the current
//! and previous layers of a crossfade hit the same entries.

mod feature_cache;
mod stats;

use std::sync::Arc;

pub use feature_cache::{FeatureCache, FeatureCacheConfig, DEFAULT_MAX_BYTES, DEFAULT_MAX_ENTRIES};
pub use stats::{CacheStats, CACHE_STATS_EVENT};

use crate::coord::TileCoord;

/// Identity of a cached tile.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TileKey {
    pub origin: Arc<str>,
    pub layer: Arc<str>,
    pub coord: TileCoord,
}

impl TileKey {
    pub fn new(origin: impl Into<Arc<str>>, layer: impl Into<Arc<str>>, coord: TileCoord) -> Self {
        Self {
            origin: origin.into(),
            layer: layer.into(),
            coord,
        }
    }
}

impl std::fmt::Display for TileKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.origin, self.layer, self.coord)
    }
}
