//! Server-side tile extraction from SQLite (MBTiles) archives.

mod download;
mod error;
mod extract;
mod naming;
mod service;

pub use download::{
    format_http_date, parse_http_date, CacheEntryInfo, CacheStatus, CachedArchive, DownloadCache,
    DEFAULT_FRESHNESS_WINDOW, TEMP_PREFIX,
};
pub use error::{MbtilesError, MbtilesResult};
#[cfg(feature = "native-sqlite")]
pub use extract::SqlxExtractor;
pub use extract::{
    default_extractors, tile_query, CliExtractor, TileExtractor, DEFAULT_CLI_WORKERS,
    DEFAULT_SQLITE_BINARY,
};
pub use naming::{cache_file_name, parse_cache_file_name, CachedArchiveName, MBTILES_EXTENSION};
pub use service::{tile_etag, MbtilesOrigin, MbtilesService, MbtilesTile};
