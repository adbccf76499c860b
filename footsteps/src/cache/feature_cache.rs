//! Process-wide LRU cache of decoded tiles.
//!
//! Bounded by entry count and by estimated bytes. Eviction is strict
//! least-recently-used: after every insert the oldest entry is dropped until
//! both bounds hold.
//!
//! Recency order is exact: a `get` moves the entry to the back, and eviction
//! always takes the front. The store sits behind a short critical section.

use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::trace;

use super::stats::CacheStats;
use super::TileKey;
use crate::decoder::FeatureSet;

/// Default entry bound.
pub const DEFAULT_MAX_ENTRIES: usize = 1024;

/// Default byte bound (256 MiB).
pub const DEFAULT_MAX_BYTES: usize = 256 * 1024 * 1024;

/// Feature cache bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureCacheConfig {
    pub max_entries: usize,
    pub max_bytes: usize,
}

impl Default for FeatureCacheConfig {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_MAX_ENTRIES,
            max_bytes: DEFAULT_MAX_BYTES,
        }
    }
}

impl FeatureCacheConfig {
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }

    pub fn with_max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = max_bytes;
        self
    }
}

#[derive(Debug)]
struct CacheEntry {
    features: Arc<FeatureSet>,
    approx_bytes: usize,
}

#[derive(Debug)]
struct Store {
    entries: LruCache<TileKey, CacheEntry>,
    total_bytes: usize,
    hits: u64,
    misses: u64,
}

impl Store {
    fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits,
            misses: self.misses,
            tile_count: self.entries.len(),
            total_bytes: self.total_bytes,
        }
    }
}

/// Shared decoded-tile cache.
pub struct FeatureCache {
    config: FeatureCacheConfig,
    store: Mutex<Store>,
    stats: watch::Sender<Option<CacheStats>>,
}

impl std::fmt::Debug for FeatureCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeatureCache")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish()
    }
}

impl Default for FeatureCache {
    fn default() -> Self {
        Self::new(FeatureCacheConfig::default())
    }
}

impl FeatureCache {
    pub fn new(config: FeatureCacheConfig) -> Self {
        let (stats, _) = watch::channel(None);
        Self {
            config,
            store: Mutex::new(Store {
                entries: LruCache::unbounded(),
                total_bytes: 0,
                hits: 0,
                misses: 0,
            }),
            stats,
        }
    }

    pub fn config(&self) -> FeatureCacheConfig {
        self.config
    }

    /// Looks up a tile and marks it most recently used.
    pub fn get(&self, key: &TileKey) -> Option<Arc<FeatureSet>> {
        let (found, snapshot) = {
            let mut store = self.store.lock();
            let found = store.entries.get(key).map(|e| Arc::clone(&e.features));
            if found.is_some() {
                store.hits += 1;
            } else {
                store.misses += 1;
            }
            (found, store.snapshot())
        };
        self.publish(snapshot);
        found
    }

    /// Inserts or replaces a tile.
    ///
    /// `encoded_bytes` is the payload size if known (0 otherwise); the
    /// entry is charged the larger of that and the feature estimate. Empty
    /// feature sets are never stored.
    pub fn set(&self, key: TileKey, features: Arc<FeatureSet>, encoded_bytes: usize) {
        if features.is_empty() {
            return;
        }
        let approx_bytes = features.approx_bytes(Some(encoded_bytes));

        let snapshot = {
            let mut store = self.store.lock();
            if let Some((_, old)) = store.entries.push(
                key,
                CacheEntry {
                    features,
                    approx_bytes,
                },
            ) {
                store.total_bytes -= old.approx_bytes;
            }
            store.total_bytes += approx_bytes;

            while store.entries.len() > self.config.max_entries
                || store.total_bytes > self.config.max_bytes
            {
                let Some((evicted, entry)) = store.entries.pop_lru() else {
                    break;
                };
                store.total_bytes -= entry.approx_bytes;
                trace!(tile = %evicted.coord, layer = %evicted.layer, "Evicted");
            }
            store.snapshot()
        };
        self.publish(snapshot);
    }

    /// Whether `key` is cached, without touching recency or counters.
    pub fn contains(&self, key: &TileKey) -> bool {
        self.store.lock().entries.contains(key)
    }

    pub fn len(&self) -> usize {
        self.store.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn total_bytes(&self) -> usize {
        self.store.lock().total_bytes
    }

    /// Drops every entry. Counters are kept.
    pub fn clear(&self) {
        let snapshot = {
            let mut store = self.store.lock();
            store.entries.clear();
            store.total_bytes = 0;
            store.snapshot()
        };
        self.publish(snapshot);
    }

    /// Current statistics.
    pub fn stats(&self) -> CacheStats {
        self.store.lock().snapshot()
    }

    /// Subscribes to statistics snapshots. `None` until the first mutation.
    pub fn subscribe(&self) -> watch::Receiver<Option<CacheStats>> {
        self.stats.subscribe()
    }

    fn publish(&self, snapshot: CacheStats) {
        self.stats.send_replace(Some(snapshot));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coord::TileCoord;
    use crate::decoder::{Feature, Geometry};
    use proptest::prelude::*;
    use std::collections::BTreeMap;

    fn key(x: u32) -> TileKey {
        TileKey::new("origin", "humans_1500_lod_2", TileCoord { z: 10, x, y: 0 })
    }

    fn features(count: usize) -> Arc<FeatureSet> {
        let features = (0..count)
            .map(|i| Feature {
                id: Some(i as u64),
                geometry: Geometry::Points(vec![(0.0, 0.0)]),
                properties: BTreeMap::new(),
            })
            .collect();
        Arc::new(FeatureSet::new("humans", features))
    }

    fn small(max_entries: usize, max_bytes: usize) -> FeatureCache {
        FeatureCache::new(
            FeatureCacheConfig::default()
                .with_max_entries(max_entries)
                .with_max_bytes(max_bytes),
        )
    }

    #[test]
    fn test_get_refreshes_recency() {
        let cache = small(2, usize::MAX);
        cache.set(key(1), features(1), 0);
        cache.set(key(2), features(1), 0);
        assert!(cache.get(&key(1)).is_some());
        cache.set(key(3), features(1), 0);

        assert!(cache.contains(&key(1)));
        assert!(!cache.contains(&key(2)));
        assert!(cache.contains(&key(3)));
    }

    #[test]
    fn test_empty_set_is_noop() {
        let cache = small(4, usize::MAX);
        cache.set(key(1), features(2), 0);
        cache.set(key(1), features(0), 100);
        cache.set(key(2), features(0), 100);

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&key(1)).unwrap().len(), 2);
    }

    #[test]
    fn test_replace_adjusts_bytes_by_delta() {
        let cache = small(4, usize::MAX);
        cache.set(key(1), features(1), 1000);
        assert_eq!(cache.total_bytes(), 1000);
        cache.set(key(1), features(1), 300);
        assert_eq!(cache.total_bytes(), 300);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_byte_bound_evicts_oldest() {
        let cache = small(100, 250);
        cache.set(key(1), features(1), 100);
        cache.set(key(2), features(1), 100);
        cache.set(key(3), features(1), 100);

        assert!(!cache.contains(&key(1)));
        assert_eq!(cache.total_bytes(), 200);
    }

    #[test]
    fn test_estimate_used_when_larger_than_encoded() {
        let cache = small(10, usize::MAX);
        cache.set(key(1), features(10), 1);
        assert_eq!(cache.total_bytes(), 10 * 80);
    }

    #[test]
    fn test_stats_published() {
        let cache = small(10, usize::MAX);
        let rx = cache.subscribe();
        assert!(rx.borrow().is_none());

        cache.get(&key(1));
        cache.set(key(1), features(1), 0);
        cache.get(&key(1));

        let stats = (*rx.borrow()).unwrap();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.tile_count, 1);
        assert_eq!(stats.total_bytes, 80);
    }

    proptest! {
        #[test]
        fn test_bounds_hold_after_every_set(
            ops in prop::collection::vec((0u32..20, 0usize..5, 0usize..400), 1..200),
            max_entries in 1usize..8,
            max_bytes in 50usize..1000,
        ) {
            let cache = small(max_entries, max_bytes);
            for (x, count, encoded) in ops {
                cache.set(key(x), features(count), encoded);
                let stats = cache.stats();
                prop_assert!(stats.tile_count <= max_entries);
                prop_assert!(stats.total_bytes <= max_bytes);
            }
        }
    }
}
