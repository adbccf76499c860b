//! Process-wide service context.
//!
//! Owns the shared pieces that must survive UI remounts: the feature cache,
//! the archive registry, the fetch limiter and the tile loader built on
//! them. Create one context per process at startup and hand clones of its
//! `Arc`s to consumers; a second context would split the cache and double
//! the fetch budget.
//!
//! ```text
//! FootstepsContext
//!   ├── FeatureCache ─────────┐
//!   ├── ArchiveRegistry ──────┼──► TileLoader ──► TileEvent (broadcast)
//!   ├── FetchLimiter ─────────┘                      │
//!   │                                                ▼
//!   ├── spawn_year_crossfade() ──► CrossfadeDriver<Year>
//!   ├── spawn_lod_crossfade()  ──► CrossfadeDriver<Lod>
//!   └── server_state()         ──► TileProxy + MbtilesService
//! ```

use std::sync::Arc;

use reqwest::Client;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::config::AppConfig;
use super::error::AppError;
use crate::cache::FeatureCache;
use crate::coord::Year;
use crate::crossfade::{CrossfadeDriver, CrossfadeHandle};
use crate::decoder::MvtDecoder;
use crate::lod::Lod;
use crate::mbtiles::{default_extractors, DownloadCache, MbtilesService};
use crate::pipeline::{spawn_arrival_forwarder, FetchLimiter, TileLoader};
use crate::pmtiles::{ArchiveRegistry, HttpSourceFactory, LocalSourceFactory, SourceFactory};
use crate::server::{ServerState, TileProxy};

/// User agent sent on every outgoing request.
pub const USER_AGENT: &str = concat!("footsteps/", env!("CARGO_PKG_VERSION"));

/// Shared services of one process.
pub struct FootstepsContext {
    config: AppConfig,
    client: Client,
    cache: Arc<FeatureCache>,
    registry: Arc<ArchiveRegistry>,
    limiter: FetchLimiter,
    loader: Arc<TileLoader>,
    shutdown: CancellationToken,
}

impl FootstepsContext {
    /// Builds the context, picking local or HTTP archive access from the
    /// origin.
    pub fn new(config: AppConfig) -> Result<Self, AppError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| AppError::HttpClient(e.to_string()))?;

        let factory: Arc<dyn SourceFactory> = if config.is_local_origin() {
            Arc::new(LocalSourceFactory)
        } else {
            let mut factory = HttpSourceFactory::new(client.clone());
            if let Some(policy) = &config.cache_bust {
                factory = factory.with_cache_bust(policy.clone());
            }
            Arc::new(factory)
        };

        Ok(Self::with_factory(config, client, factory))
    }

    /// Builds the context around an explicit archive source factory.
    pub fn with_factory(config: AppConfig, client: Client, factory: Arc<dyn SourceFactory>) -> Self {
        let cache = Arc::new(FeatureCache::new(config.cache));
        let registry = Arc::new(ArchiveRegistry::with_capacity(
            factory,
            config.archive_capacity,
        ));
        let limiter = FetchLimiter::new(config.max_concurrency, "tiles");
        let loader = Arc::new(TileLoader::new(
            config.origin.as_str(),
            Arc::clone(&cache),
            Arc::clone(&registry),
            limiter.clone(),
            Arc::new(MvtDecoder::new()),
        ));

        info!(
            origin = %config.origin,
            max_entries = config.cache.max_entries,
            max_bytes = config.cache.max_bytes,
            max_concurrency = config.max_concurrency,
            "Context ready"
        );

        Self {
            config,
            client,
            cache,
            registry,
            limiter,
            loader,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn cache(&self) -> &Arc<FeatureCache> {
        &self.cache
    }

    pub fn registry(&self) -> &Arc<ArchiveRegistry> {
        &self.registry
    }

    pub fn limiter(&self) -> &FetchLimiter {
        &self.limiter
    }

    pub fn loader(&self) -> &Arc<TileLoader> {
        &self.loader
    }

    /// Token cancelled by [`shutdown`](Self::shutdown).
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Detail level for a zoom under the configured breakpoints.
    pub fn select_lod(&self, zoom: f64) -> Lod {
        self.config.lod.select(zoom)
    }

    /// Starts a year crossfade fed by the loader's arrivals.
    pub fn spawn_year_crossfade(&self, initial: Year) -> CrossfadeHandle<Year> {
        let handle = CrossfadeDriver::spawn(initial, self.config.crossfade, self.shutdown.child_token());
        spawn_arrival_forwarder(
            self.loader.subscribe(),
            handle.clone(),
            |layer| layer.year,
            self.shutdown.child_token(),
        );
        handle
    }

    /// Starts a LOD crossfade fed by the loader's arrivals.
    pub fn spawn_lod_crossfade(&self, initial: Lod) -> CrossfadeHandle<Lod> {
        let handle = CrossfadeDriver::spawn(initial, self.config.crossfade, self.shutdown.child_token());
        spawn_arrival_forwarder(
            self.loader.subscribe(),
            handle.clone(),
            |layer| layer.lod,
            self.shutdown.child_token(),
        );
        handle
    }

    /// Server-side services enabled by the configuration.
    pub fn server_state(&self) -> ServerState {
        let mut state = ServerState::default();
        if let Some(upstream) = &self.config.upstream {
            state = state.with_proxy(TileProxy::new(self.client.clone(), upstream));
        }
        if let Some(mbtiles) = &self.config.mbtiles {
            let downloads = Arc::new(DownloadCache::new(
                mbtiles.cache_dir.clone(),
                self.client.clone(),
            ));
            let service = MbtilesService::new(
                mbtiles.origin.clone(),
                downloads,
                default_extractors(&mbtiles.sqlite_binary, mbtiles.cli_workers),
            );
            state = state.with_mbtiles(Arc::new(service));
        }
        state
    }

    /// Cancels in-flight fetches and stops the crossfade drivers.
    pub fn shutdown(&self) {
        self.loader.shutdown();
        self.shutdown.cancel();
    }
}

impl Drop for FootstepsContext {
    fn drop(&mut self) {
        self.shutdown();
    }
}
