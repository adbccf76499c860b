//! Tile loader.
//!
//! Resolves tiles for a layer through the shared cache, the fetch limiter,
//! the archive registry and the decoder, and reports what arrived on a
//! broadcast channel:
//!
//! ```text
//! load_tile(layer, z/x/y)
//!   ├─ cache hit ─────────────────────────────────────► Tile
//!   └─ miss → limiter.acquire → registry.get_tile → decode → cache.set ─► Tile
//!        ├─ aborted (scrolled away / preempted) ──► nothing, not cached
//!        ├─ tile-level failure ───────────────────► empty, not cached
//!        └─ archive-level failure ────────────────► Unavailable
//!
//! load_viewport(layer, viewport)
//!   cancels tiles that left the view, takes over the rest from any
//!   earlier pass, loads them ─► ViewportCovered
//!   (the newest pass refetches tiles lost to preemption)
//! ```

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashSet;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::fetch_limiter::FetchLimiter;
use crate::cache::{FeatureCache, TileKey};
use crate::coord::{TileCoord, Viewport, Year};
use crate::crossfade::Arrival;
use crate::decoder::{decode_tile, FeatureSet, TileDecoder};
use crate::lod::Lod;
use crate::pmtiles::{ArchiveError, ArchiveRegistry, ARCHIVE_PREFIX};

/// Buffered events per subscriber.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Times the newest viewport pass refetches a tile lost to preemption.
const MAX_PREEMPTED_RETRIES: usize = 8;

/// One renderable layer: a year at a level of detail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct LayerId {
    pub year: Year,
    pub lod: Lod,
}

impl LayerId {
    pub fn new(year: Year, lod: Lod) -> Self {
        Self { year, lod }
    }

    /// Cache layer name, independent of how the archive is split.
    pub fn name(&self) -> String {
        format!("{}_{}_lod_{}", ARCHIVE_PREFIX, self.year, self.lod.level())
    }
}

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

/// Arrival events emitted by the loader.
#[derive(Debug, Clone, PartialEq)]
pub enum TileEvent {
    /// A tile of the layer resolved with data.
    Tile {
        layer: LayerId,
        coord: TileCoord,
        features: usize,
    },
    /// Every tile of the requested viewport resolved.
    ViewportCovered { layer: LayerId },
    /// The layer's archive cannot be read.
    Unavailable { layer: LayerId, reason: String },
}

impl TileEvent {
    pub fn layer(&self) -> LayerId {
        match self {
            TileEvent::Tile { layer, .. }
            | TileEvent::ViewportCovered { layer }
            | TileEvent::Unavailable { layer, .. } => *layer,
        }
    }

    /// Maps the event onto a crossfade arrival keyed by `key`.
    pub fn arrival<K>(&self, key: K) -> Arrival<K> {
        match self {
            TileEvent::Tile { .. } => Arrival::Tile(key),
            TileEvent::ViewportCovered { .. } => Arrival::ViewportCovered(key),
            TileEvent::Unavailable { .. } => Arrival::Unavailable(key),
        }
    }
}

/// Result of loading one tile.
#[derive(Debug, Clone)]
pub enum TileOutcome {
    Loaded(Arc<FeatureSet>),
    /// No data at this tile, or a tile-level failure.
    Empty,
    /// Cancelled before completion.
    Aborted,
    /// The layer's archive cannot be read.
    Unavailable(ArchiveError),
}

impl TileOutcome {
    pub fn features(&self) -> Option<&Arc<FeatureSet>> {
        match self {
            TileOutcome::Loaded(features) => Some(features),
            _ => None,
        }
    }
}

/// Totals for one `load_viewport` pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ViewportReport {
    pub loaded: usize,
    pub empty: usize,
    pub aborted: usize,
    pub unavailable: usize,
}

impl ViewportReport {
    /// Whether every tile resolved (with or without data).
    pub fn covered(&self) -> bool {
        self.aborted == 0 && self.unavailable == 0
    }

    fn record(&mut self, outcome: &TileOutcome) {
        match outcome {
            TileOutcome::Loaded(_) => self.loaded += 1,
            TileOutcome::Empty => self.empty += 1,
            TileOutcome::Aborted => self.aborted += 1,
            TileOutcome::Unavailable(_) => self.unavailable += 1,
        }
    }
}

#[derive(Debug)]
struct ActiveTile {
    pass: u64,
    token: CancellationToken,
}

/// Loads tiles of one origin.
pub struct TileLoader {
    origin: Arc<str>,
    cache: Arc<FeatureCache>,
    registry: Arc<ArchiveRegistry>,
    limiter: FetchLimiter,
    decoder: Arc<dyn TileDecoder>,
    events: broadcast::Sender<TileEvent>,
    active: Mutex<HashMap<(LayerId, TileCoord), ActiveTile>>,
    unavailable: DashSet<LayerId>,
    passes: AtomicU64,
    shutdown: CancellationToken,
}

impl fmt::Debug for TileLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TileLoader")
            .field("origin", &self.origin)
            .field("in_flight", &self.limiter.in_flight())
            .finish_non_exhaustive()
    }
}

impl TileLoader {
    pub fn new(
        origin: impl Into<Arc<str>>,
        cache: Arc<FeatureCache>,
        registry: Arc<ArchiveRegistry>,
        limiter: FetchLimiter,
        decoder: Arc<dyn TileDecoder>,
    ) -> Self {
        let (events, _) = broadcast::channel(DEFAULT_EVENT_CAPACITY);
        Self {
            origin: origin.into(),
            cache,
            registry,
            limiter,
            decoder,
            events,
            active: Mutex::new(HashMap::new()),
            unavailable: DashSet::new(),
            passes: AtomicU64::new(0),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn cache(&self) -> &Arc<FeatureCache> {
        &self.cache
    }

    pub fn limiter(&self) -> &FetchLimiter {
        &self.limiter
    }

    /// Subscribes to arrival events.
    pub fn subscribe(&self) -> broadcast::Receiver<TileEvent> {
        self.events.subscribe()
    }

    /// Loads one tile. `cancel` ends the fetch when the tile is no longer
    /// wanted; cancellation yields [`TileOutcome::Aborted`].
    pub async fn load_tile(
        &self,
        layer: LayerId,
        coord: TileCoord,
        cancel: &CancellationToken,
    ) -> TileOutcome {
        let key = TileKey::new(Arc::clone(&self.origin), layer.name(), coord);
        if let Some(features) = self.cache.get(&key) {
            self.emit(TileEvent::Tile {
                layer,
                coord,
                features: features.len(),
            });
            return TileOutcome::Loaded(features);
        }

        if self.unavailable.contains(&layer) {
            return TileOutcome::Empty;
        }
        if cancel.is_cancelled() {
            return TileOutcome::Aborted;
        }

        let permit = self.limiter.acquire_child(cancel);
        let result = self
            .registry
            .get_tile(&self.origin, layer.year, layer.lod, coord, Some(permit.token()))
            .await;
        drop(permit);

        let tile = match result {
            Ok(Some(tile)) => tile,
            Ok(None) => {
                debug!(layer = %layer, tile = %coord, "No data at tile");
                return TileOutcome::Empty;
            }
            Err(e) if e.is_abort() => {
                debug!(layer = %layer, tile = %coord, "Tile fetch aborted");
                return TileOutcome::Aborted;
            }
            Err(e) if e.is_archive_level() => {
                if self.unavailable.insert(layer) {
                    warn!(layer = %layer, error = %e, "Layer data unavailable");
                    self.emit(TileEvent::Unavailable {
                        layer,
                        reason: e.to_string(),
                    });
                }
                return TileOutcome::Unavailable(e);
            }
            Err(e) => {
                warn!(layer = %layer, tile = %coord, error = %e, "Tile fetch failed");
                return TileOutcome::Empty;
            }
        };

        match decode_tile(self.decoder.as_ref(), coord, &tile) {
            Ok(set) if set.is_empty() => TileOutcome::Empty,
            Ok(set) => {
                let features = Arc::new(set);
                self.cache
                    .set(key, Arc::clone(&features), tile.data.len());
                debug!(layer = %layer, tile = %coord, features = features.len(), "Tile loaded");
                self.emit(TileEvent::Tile {
                    layer,
                    coord,
                    features: features.len(),
                });
                TileOutcome::Loaded(features)
            }
            Err(e) => {
                warn!(layer = %layer, tile = %coord, error = %e, "Tile decode failed");
                TileOutcome::Empty
            }
        }
    }

    /// Loads every tile of `viewport` for `layer`.
    ///
    /// Tiles of the layer requested by an earlier pass are taken over: the
    /// ones no longer visible are cancelled, the ones still visible get a
    /// fresh token and the earlier pass stops fetching them. Emits
    /// `ViewportCovered` when every visible tile resolved.
    pub async fn load_viewport(&self, layer: LayerId, viewport: &Viewport) -> ViewportReport {
        let pass = self.passes.fetch_add(1, Ordering::Relaxed);
        let visible = viewport.tiles();
        let wanted: HashSet<TileCoord> = visible.iter().copied().collect();

        let tokens: Vec<(TileCoord, CancellationToken)> = {
            let mut active = self.active.lock();
            active.retain(|(l, coord), tile| {
                let keep = *l != layer || wanted.contains(coord);
                if !keep {
                    tile.token.cancel();
                }
                keep
            });
            visible
                .iter()
                .map(|coord| {
                    let token = self.shutdown.child_token();
                    let claim = ActiveTile {
                        pass,
                        token: token.clone(),
                    };
                    // The earlier pass gives the tile up; its worker stops
                    // before taking another fetch slot.
                    if let Some(previous) = active.insert((layer, *coord), claim) {
                        previous.token.cancel();
                    }
                    (*coord, token)
                })
                .collect()
        };

        debug!(layer = %layer, tiles = tokens.len(), pass, "Loading viewport");

        let outcomes: Vec<(TileCoord, TileOutcome)> = stream::iter(tokens)
            .map(|(coord, token)| async move {
                let outcome = self.load_claimed_tile(layer, coord, &token, pass).await;
                (coord, outcome)
            })
            .buffer_unordered(self.limiter.capacity())
            .collect()
            .await;

        let mut report = ViewportReport::default();
        {
            let mut active = self.active.lock();
            for (coord, outcome) in &outcomes {
                report.record(outcome);
                if active
                    .get(&(layer, *coord))
                    .is_some_and(|tile| tile.pass == pass)
                {
                    active.remove(&(layer, *coord));
                }
            }
        }

        if report.covered() {
            info!(
                layer = %layer,
                pass,
                loaded = report.loaded,
                empty = report.empty,
                "Viewport covered"
            );
            self.emit(TileEvent::ViewportCovered { layer });
        }
        report
    }

    /// Loads a tile claimed by viewport pass `pass`.
    ///
    /// A fetch preempted by the limiter while the tile is still wanted is
    /// retried, as long as `pass` is the newest pass of the loader.
    async fn load_claimed_tile(
        &self,
        layer: LayerId,
        coord: TileCoord,
        token: &CancellationToken,
        pass: u64,
    ) -> TileOutcome {
        let mut retries = 0;
        loop {
            let outcome = self.load_tile(layer, coord, token).await;
            let preempted = matches!(outcome, TileOutcome::Aborted) && !token.is_cancelled();
            if !preempted || retries == MAX_PREEMPTED_RETRIES || !self.is_newest_pass(pass) {
                return outcome;
            }
            retries += 1;
            debug!(layer = %layer, tile = %coord, pass, retries, "Retrying preempted tile");
        }
    }

    fn is_newest_pass(&self, pass: u64) -> bool {
        self.passes.load(Ordering::Relaxed) == pass + 1
    }

    /// Cancels every in-flight fetch of `layer`.
    pub fn cancel_layer(&self, layer: LayerId) {
        self.active.lock().retain(|(l, _), tile| {
            if *l == layer {
                tile.token.cancel();
                false
            } else {
                true
            }
        });
    }

    /// Forgets that `layer` was unavailable so it is tried again.
    pub fn retry_unavailable(&self, layer: LayerId) {
        self.unavailable.remove(&layer);
    }

    /// Cancels all fetches; used on teardown.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        self.active.lock().clear();
    }

    fn emit(&self, event: TileEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

impl Drop for TileLoader {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Forwards loader events for one kind of layer key to a crossfade driver.
///
/// `key_of` picks the crossfade key out of a layer (its year, or its LOD).
/// Ends when the loader is dropped, the driver stops, or `shutdown` fires.
pub fn spawn_arrival_forwarder<K, F>(
    mut events: broadcast::Receiver<TileEvent>,
    handle: crate::crossfade::CrossfadeHandle<K>,
    key_of: F,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()>
where
    K: Copy + PartialEq + fmt::Debug + Send + Sync + 'static,
    F: Fn(&LayerId) -> K + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                event = events.recv() => event,
            };
            match event {
                Ok(event) => {
                    let key = key_of(&event.layer());
                    if !handle.arrival(event.arrival(key)).await {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Arrival forwarder lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::MvtDecoder;
    use crate::pmtiles::{ArchiveWriter, SourceFactory};
    use crate::source::{MemoryRangeSource, RangeResponse, RangeSource, SourceError};
    use dashmap::DashMap;
    use futures::future::BoxFuture;
    use std::time::Duration;
    use geozero::mvt::tile::{self, GeomType};
    use geozero::mvt::{Message, Tile};

    #[derive(Default)]
    struct FixtureFactory {
        archives: DashMap<String, Vec<u8>>,
        latency: Duration,
    }

    impl SourceFactory for FixtureFactory {
        fn open<'a>(
            &'a self,
            location: &'a str,
        ) -> BoxFuture<'a, Result<Arc<dyn RangeSource>, SourceError>> {
            Box::pin(async move {
                let data = self.archives.get(location).map(|d| d.clone()).ok_or_else(|| {
                    SourceError::NotFound {
                        url: location.to_string(),
                    }
                })?;
                let source = MemoryRangeSource::new(location, data);
                if self.latency.is_zero() {
                    return Ok(Arc::new(source) as Arc<dyn RangeSource>);
                }
                Ok(Arc::new(SlowSource {
                    inner: source,
                    latency: self.latency,
                }) as Arc<dyn RangeSource>)
            })
        }
    }

    /// Answers every read after a fixed delay, like a distant origin.
    struct SlowSource {
        inner: MemoryRangeSource,
        latency: Duration,
    }

    impl RangeSource for SlowSource {
        fn key(&self) -> &str {
            self.inner.key()
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
                    Some(token) => tokio::select! {
                        _ = token.cancelled() => return Err(SourceError::Aborted),
                        _ = tokio::time::sleep(self.latency) => {}
                    },
                    None => tokio::time::sleep(self.latency).await,
                }
                self.inner.get_bytes(offset, length, cancel, known_etag).await
            })
        }
    }

    fn mvt_points(count: usize) -> Vec<u8> {
        let features = (0..count)
            .map(|i| tile::Feature {
                id: Some(i as u64),
                tags: vec![],
                r#type: Some(GeomType::Point as i32),
                geometry: vec![(1 << 3) | 1, 20, 20],
            })
            .collect();
        Tile {
            layers: vec![tile::Layer {
                version: 2,
                name: "humans".to_string(),
                features,
                keys: vec![],
                values: vec![],
                extent: Some(4096),
            }],
        }
        .encode_to_vec()
    }

    fn loader_with(archives: &[(&str, Vec<(TileCoord, Vec<u8>)>)]) -> TileLoader {
        slow_loader_with(archives, Duration::ZERO)
    }

    fn slow_loader_with(
        archives: &[(&str, Vec<(TileCoord, Vec<u8>)>)],
        latency: Duration,
    ) -> TileLoader {
        let factory = FixtureFactory {
            latency,
            ..Default::default()
        };
        for (name, tiles) in archives {
            let mut writer = ArchiveWriter::new();
            for (coord, data) in tiles {
                writer.add_tile(*coord, data.clone()).unwrap();
            }
            factory
                .archives
                .insert(format!("o/{}", name), writer.finish().unwrap());
        }
        TileLoader::new(
            "o",
            Arc::new(FeatureCache::default()),
            Arc::new(ArchiveRegistry::new(Arc::new(factory))),
            FetchLimiter::new(2, "test"),
            Arc::new(MvtDecoder::new()),
        )
    }

    const LAYER: LayerId = LayerId {
        year: 1500,
        lod: Lod::REGIONAL,
    };

    const PREVIOUS_LAYER: LayerId = LayerId {
        year: 1000,
        lod: Lod::REGIONAL,
    };

    fn world_tiles() -> Vec<(TileCoord, Vec<u8>)> {
        [(0, 0), (1, 0), (0, 1), (1, 1)]
            .iter()
            .map(|&(x, y)| (TileCoord { z: 1, x, y }, mvt_points(2)))
            .collect()
    }

    fn covered_layers(events: &mut broadcast::Receiver<TileEvent>) -> Vec<LayerId> {
        let mut covered = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let TileEvent::ViewportCovered { layer } = event {
                covered.push(layer);
            }
        }
        covered
    }

    #[test]
    fn test_layer_name() {
        assert_eq!(LAYER.name(), "humans_1500_lod_0");
    }

    #[tokio::test]
    async fn test_load_tile_caches_and_emits() {
        let coord = TileCoord { z: 1, x: 1, y: 0 };
        let loader = loader_with(&[("humans_1500.pmtiles", vec![(coord, mvt_points(3))])]);
        let mut events = loader.subscribe();
        let token = CancellationToken::new();

        let outcome = loader.load_tile(LAYER, coord, &token).await;
        assert_eq!(outcome.features().unwrap().len(), 3);
        assert_eq!(loader.cache().len(), 1);
        assert_eq!(
            events.recv().await.unwrap(),
            TileEvent::Tile {
                layer: LAYER,
                coord,
                features: 3
            }
        );

        // Second load is a cache hit.
        loader.load_tile(LAYER, coord, &token).await;
        assert_eq!(loader.cache().stats().hits, 1);
    }

    #[tokio::test]
    async fn test_missing_tile_is_empty_and_not_cached() {
        let loader = loader_with(&[(
            "humans_1500.pmtiles",
            vec![(TileCoord { z: 1, x: 0, y: 0 }, mvt_points(1))],
        )]);
        let outcome = loader
            .load_tile(LAYER, TileCoord { z: 1, x: 1, y: 1 }, &CancellationToken::new())
            .await;
        assert!(matches!(outcome, TileOutcome::Empty));
        assert!(loader.cache().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_load_is_aborted_and_not_cached() {
        let coord = TileCoord { z: 1, x: 0, y: 0 };
        let loader = loader_with(&[("humans_1500.pmtiles", vec![(coord, mvt_points(1))])]);
        let token = CancellationToken::new();
        token.cancel();

        let outcome = loader.load_tile(LAYER, coord, &token).await;
        assert!(matches!(outcome, TileOutcome::Aborted));
        assert!(loader.cache().is_empty());
    }

    #[tokio::test]
    async fn test_missing_year_is_unavailable_once() {
        let loader = loader_with(&[]);
        let mut events = loader.subscribe();
        let token = CancellationToken::new();

        let first = loader
            .load_tile(LAYER, TileCoord { z: 0, x: 0, y: 0 }, &token)
            .await;
        assert!(matches!(first, TileOutcome::Unavailable(_)));
        assert!(matches!(
            events.recv().await.unwrap(),
            TileEvent::Unavailable { .. }
        ));

        let second = loader
            .load_tile(LAYER, TileCoord { z: 1, x: 0, y: 0 }, &token)
            .await;
        assert!(matches!(second, TileOutcome::Empty));
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_viewport_covered_after_all_tiles() {
        let tiles: Vec<(TileCoord, Vec<u8>)> = [(0, 0), (1, 0), (0, 1)]
            .iter()
            .map(|&(x, y)| (TileCoord { z: 1, x, y }, mvt_points(1)))
            .collect();
        let loader = loader_with(&[("humans_1500.pmtiles", tiles)]);
        let mut events = loader.subscribe();

        let report = loader.load_viewport(LAYER, &Viewport::world(1)).await;
        assert_eq!(report.loaded, 3);
        assert_eq!(report.empty, 1);
        assert!(report.covered());

        let mut covered = false;
        while let Ok(event) = events.try_recv() {
            covered |= event == TileEvent::ViewportCovered { layer: LAYER };
        }
        assert!(covered);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_passes_newest_covers() {
        let loader = slow_loader_with(
            &[("humans_1500.pmtiles", world_tiles())],
            Duration::from_millis(50),
        );
        let mut events = loader.subscribe();
        let viewport = Viewport::world(1);

        let second = async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            loader.load_viewport(LAYER, &viewport).await
        };
        let (first, second) = tokio::join!(loader.load_viewport(LAYER, &viewport), second);

        // The first pass handed every tile over to the second.
        assert_eq!(first.aborted, 4);
        assert!(second.covered());
        assert_eq!(second.loaded, 4);
        assert_eq!(covered_layers(&mut events), vec![LAYER]);
        assert!(loader.active.lock().is_empty());
        assert_eq!(loader.limiter().in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tiles_from_overlapping_passes_are_cached() {
        let loader = slow_loader_with(
            &[("humans_1500.pmtiles", world_tiles())],
            Duration::from_millis(50),
        );
        let viewport = Viewport::world(1);

        let second = async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            loader.load_viewport(LAYER, &viewport).await
        };
        let _ = tokio::join!(loader.load_viewport(LAYER, &viewport), second);

        // A third pass is served from the cache without touching the origin.
        let third = loader.load_viewport(LAYER, &viewport).await;
        assert_eq!(third.loaded, 4);
        assert_eq!(loader.cache().stats().hits, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_current_and_previous_year_load_concurrently() {
        let loader = slow_loader_with(
            &[
                ("humans_1000.pmtiles", world_tiles()),
                ("humans_1500.pmtiles", world_tiles()),
            ],
            Duration::from_millis(50),
        );
        let mut events = loader.subscribe();
        let viewport = Viewport::world(1);

        let current = async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            loader.load_viewport(LAYER, &viewport).await
        };
        let (previous, current) =
            tokio::join!(loader.load_viewport(PREVIOUS_LAYER, &viewport), current);

        // Both layers compete for two fetch slots; the newest pass wins them
        // back after every preemption.
        assert!(current.covered());
        assert_eq!(current.loaded, 4);
        assert_eq!(previous.unavailable, 0);
        assert!(covered_layers(&mut events).contains(&LAYER));
        assert_eq!(loader.limiter().in_flight(), 0);
        assert!(loader.limiter().preempted() > 0);
    }

    #[tokio::test]
    async fn test_cancel_layer_cancels_active_tokens() {
        let loader = loader_with(&[]);
        let token = {
            let mut active = loader.active.lock();
            let token = CancellationToken::new();
            active.insert(
                (LAYER, TileCoord { z: 0, x: 0, y: 0 }),
                ActiveTile {
                    pass: 0,
                    token: token.clone(),
                },
            );
            token
        };
        loader.cancel_layer(LAYER);
        assert!(token.is_cancelled());
    }
}
