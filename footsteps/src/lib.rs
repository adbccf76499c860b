//! Footsteps - tile acquisition and caching for a historical settlement map
//!
//! This library fetches vector tiles for a year out of indexed single-file
//! archives with HTTP range requests, decodes them, keeps the decoded
//! features in a bounded LRU cache, and coordinates year and
//! level-of-detail crossfades on real tile arrival. A small HTTP surface
//! proxies the archive origin and serves tiles from SQLite archives.
//!
//! ```text
//! coord ── lod ─────────────────────────────┐
//!                                           ▼
//! source (range reads) ──► pmtiles (index) ──► decoder ──► cache
//!                                  ▲                         │
//!                 pipeline (limiter, loader) ◄───────────────┘
//!                                  │ TileEvent
//!                                  ▼
//!                              crossfade
//!
//! server ──► proxy + mbtiles (download cache, extractors)
//! app    ──► FootstepsContext wiring everything above
//! ```

pub mod app;
pub mod cache;
pub mod config;
pub mod coord;
pub mod crossfade;
pub mod decoder;
pub mod lod;
pub mod logging;
pub mod mbtiles;
pub mod pipeline;
pub mod pmtiles;
pub mod server;
pub mod source;

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
