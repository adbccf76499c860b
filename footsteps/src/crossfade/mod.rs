//! Layer crossfade coordination.
//!
//! Coordinates the visual handover between the previously displayed layer
//! and a newly requested one. The handover is gated on real tile arrival:
//! the old layer stays visible until the new layer has confirmed coverage
//! of the viewport, then both opacities ramp over a short fade.
//!
//! The same machinery drives two handovers:
//! - the year crossfade ([`YearCrossfade`]) when the timeline moves, and
//! - the LOD hysteresis ([`crate::lod::LodCrossfade`]) when zoom crosses a
//!   detail breakpoint.
//!
//! # Example
//!
//! ```ignore
//! use footsteps::crossfade::{CrossfadeConfig, CrossfadeDriver};
//! use tokio_util::sync::CancellationToken;
//!
//! let handle = CrossfadeDriver::spawn(1000, CrossfadeConfig::default(), CancellationToken::new());
//! handle.request(1500).await;
//! // ... the tile loader reports ViewportCovered(1500) ...
//! let state = handle.state();
//! ```

mod controller;
mod driver;

pub use controller::{
    Arrival, CrossfadeConfig, CrossfadeController, CrossfadePhase, CrossfadeState, FadeTimer,
    DEFAULT_FADE_IN, DEFAULT_FADE_OUT,
};
pub use driver::{CrossfadeCommand, CrossfadeDriver, CrossfadeHandle, DEFAULT_COMMAND_CAPACITY};

use crate::coord::Year;

/// Crossfade between timeline years.
pub type YearCrossfade = CrossfadeController<Year>;
