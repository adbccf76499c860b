//! Application configuration.
//!
//! `AppConfig` gathers every subsystem's settings in one place. It is built
//! either programmatically (`AppConfig::new` plus `with_*`) or from the
//! INI file via [`AppConfig::from_config_file`].

use std::path::PathBuf;

use crate::cache::FeatureCacheConfig;
use crate::config::ConfigFile;
use crate::crossfade::CrossfadeConfig;
use crate::lod::LodSelector;
use crate::mbtiles::{MbtilesOrigin, DEFAULT_CLI_WORKERS, DEFAULT_SQLITE_BINARY};
use crate::pipeline::DEFAULT_MAX_CONCURRENCY;
use crate::pmtiles::DEFAULT_ARCHIVE_CAPACITY;
use crate::source::CacheBustPolicy;

/// Settings of the SQLite tile service.
#[derive(Debug, Clone, PartialEq)]
pub struct MbtilesAppConfig {
    pub origin: MbtilesOrigin,
    /// Download cache for remote origins.
    pub cache_dir: PathBuf,
    pub sqlite_binary: String,
    pub cli_workers: usize,
}

impl MbtilesAppConfig {
    pub fn new(origin: MbtilesOrigin, cache_dir: PathBuf) -> Self {
        Self {
            origin,
            cache_dir,
            sqlite_binary: DEFAULT_SQLITE_BINARY.to_string(),
            cli_workers: DEFAULT_CLI_WORKERS,
        }
    }

    pub fn with_sqlite_binary(mut self, binary: impl Into<String>) -> Self {
        self.sqlite_binary = binary.into();
        self
    }

    pub fn with_cli_workers(mut self, workers: usize) -> Self {
        self.cli_workers = workers;
        self
    }
}

/// Application configuration combining all component configs.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Base location of the tile archives (URL or directory).
    pub origin: String,
    pub cache: FeatureCacheConfig,
    pub max_concurrency: usize,
    /// Range-keyed cache busting; `None` disables it.
    pub cache_bust: Option<CacheBustPolicy>,
    pub archive_capacity: u64,
    pub crossfade: CrossfadeConfig,
    pub lod: LodSelector,
    /// Upstream of the origin proxy.
    pub upstream: Option<String>,
    pub mbtiles: Option<MbtilesAppConfig>,
}

impl AppConfig {
    /// Defaults for everything but the origin.
    pub fn new(origin: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            cache: FeatureCacheConfig::default(),
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            cache_bust: None,
            archive_capacity: DEFAULT_ARCHIVE_CAPACITY,
            crossfade: CrossfadeConfig::default(),
            lod: LodSelector::default(),
            upstream: None,
            mbtiles: None,
        }
    }

    /// Translates the configuration file.
    pub fn from_config_file(config: &ConfigFile) -> Self {
        let mbtiles = config.server.mbtiles_origin.as_deref().map(|origin| {
            MbtilesAppConfig::new(MbtilesOrigin::parse(origin), config.cache.directory.clone())
                .with_sqlite_binary(config.server.sqlite_binary.clone())
                .with_cli_workers(config.server.cli_workers)
        });
        let cache_bust = config
            .fetch
            .cache_bust
            .then(|| CacheBustPolicy::new(config.fetch.trusted_hosts.iter().cloned()));

        Self {
            cache: FeatureCacheConfig::default()
                .with_max_entries(config.cache.max_entries)
                .with_max_bytes(config.cache.max_bytes),
            max_concurrency: config.fetch.max_concurrency,
            cache_bust,
            upstream: config.server.upstream.clone(),
            mbtiles,
            ..Self::new(config.origin.archive_base())
        }
    }

    pub fn with_cache(mut self, cache: FeatureCacheConfig) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    pub fn with_cache_bust(mut self, policy: CacheBustPolicy) -> Self {
        self.cache_bust = Some(policy);
        self
    }

    pub fn with_crossfade(mut self, crossfade: CrossfadeConfig) -> Self {
        self.crossfade = crossfade;
        self
    }

    pub fn with_lod(mut self, lod: LodSelector) -> Self {
        self.lod = lod;
        self
    }

    pub fn with_upstream(mut self, upstream: impl Into<String>) -> Self {
        self.upstream = Some(upstream.into());
        self
    }

    pub fn with_mbtiles(mut self, mbtiles: MbtilesAppConfig) -> Self {
        self.mbtiles = Some(mbtiles);
        self
    }

    /// Whether archives are read from the local filesystem.
    pub fn is_local_origin(&self) -> bool {
        !(self.origin.starts_with("http://") || self.origin.starts_with("https://"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::new("https://tiles.example");
        assert_eq!(config.max_concurrency, 6);
        assert_eq!(config.cache, FeatureCacheConfig::default());
        assert!(config.cache_bust.is_none());
        assert!(config.mbtiles.is_none());
        assert!(!config.is_local_origin());
        assert!(AppConfig::new("/srv/tiles").is_local_origin());
    }

    #[test]
    fn test_from_config_file() {
        let file = ConfigFile::parse(
            "[origin]\nbase_url = https://t.example\ntile_prefix = v1\n\
             [cache]\nmax_entries = 50\n\
             [fetch]\nmax_concurrency = 4\ncache_bust = true\ntrusted_hosts = t.example\n\
             [server]\nmbtiles_origin = /srv/mbtiles\ncli_workers = 2\n",
        )
        .unwrap();
        let config = AppConfig::from_config_file(&file);

        assert_eq!(config.origin, "https://t.example/v1");
        assert_eq!(config.cache.max_entries, 50);
        assert_eq!(config.max_concurrency, 4);
        assert!(config.cache_bust.is_some());
        let mbtiles = config.mbtiles.unwrap();
        assert_eq!(mbtiles.origin, MbtilesOrigin::Local(PathBuf::from("/srv/mbtiles")));
        assert_eq!(mbtiles.cli_workers, 2);
    }
}
