//! Client-side tile pipeline.
//!
//! [`FetchLimiter`] bounds concurrent fetches; [`TileLoader`] drives each
//! tile from cache lookup to decoded features and reports arrivals to the
//! crossfade drivers.

mod fetch_limiter;
mod tile_loader;

pub use fetch_limiter::{FetchLimiter, FetchPermit, DEFAULT_MAX_CONCURRENCY};
pub use tile_loader::{
    spawn_arrival_forwarder, LayerId, TileEvent, TileLoader, TileOutcome, ViewportReport,
    DEFAULT_EVENT_CAPACITY,
};
