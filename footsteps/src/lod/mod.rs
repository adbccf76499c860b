//! Level-of-detail selection.
//!
//! Maps a continuous map zoom to one of four discrete detail levels. The
//! mapping is a total, monotonic step function with no hysteresis; callers
//! that need flicker-free switching near a breakpoint use [`LodCrossfade`],
//! which holds the previous level visible until the new level's tiles have
//! arrived.
//!
//! ```text
//! zoom:  -inf ... 2 ... 4 ... 6 ... +inf
//! lod:      0   |  1  |  2  |   3
//! ```

use std::fmt;

use serde::Serialize;

use crate::crossfade::CrossfadeController;

/// Number of discrete detail levels.
pub const LOD_COUNT: usize = 4;

/// Default zoom breakpoints: `< 2 → 0`, `< 4 → 1`, `< 6 → 2`, otherwise `3`.
pub const DEFAULT_BREAKPOINTS: [f64; LOD_COUNT - 1] = [2.0, 4.0, 6.0];

/// A discrete detail level, `0` (regional) through `3` (detailed).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Lod(u8);

impl Lod {
    pub const REGIONAL: Lod = Lod(0);
    pub const SUBREGIONAL: Lod = Lod(1);
    pub const LOCAL: Lod = Lod(2);
    pub const DETAILED: Lod = Lod(3);

    /// Creates a level, returning `None` outside `0..=3`.
    pub fn new(level: u8) -> Option<Self> {
        (usize::from(level) < LOD_COUNT).then_some(Lod(level))
    }

    pub fn level(&self) -> u8 {
        self.0
    }

    /// Human-readable name of the level.
    pub fn name(&self) -> &'static str {
        match self.0 {
            0 => "regional",
            1 => "subregional",
            2 => "local",
            _ => "detailed",
        }
    }
}

impl fmt::Display for Lod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Zoom breakpoints separating the detail levels.
///
/// Breakpoints must be non-decreasing for the selector to stay monotonic;
/// [`LodSelector::new`] sorts them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LodSelector {
    breakpoints: [f64; LOD_COUNT - 1],
}

impl LodSelector {
    pub fn new(mut breakpoints: [f64; LOD_COUNT - 1]) -> Self {
        breakpoints.sort_by(|a, b| a.total_cmp(b));
        Self { breakpoints }
    }

    pub fn breakpoints(&self) -> &[f64; LOD_COUNT - 1] {
        &self.breakpoints
    }

    /// Selects the level for `zoom`.
    ///
    /// Total over all `f64`: negative and infinite zooms clamp to the end
    /// levels, NaN maps to the coarsest level.
    pub fn select(&self, zoom: f64) -> Lod {
        let level = self
            .breakpoints
            .iter()
            .take_while(|&&bp| zoom >= bp)
            .count();
        Lod(level as u8)
    }
}

impl Default for LodSelector {
    fn default() -> Self {
        Self::new(DEFAULT_BREAKPOINTS)
    }
}

/// Selects the level for `zoom` using the default breakpoints.
pub fn lod(zoom: f64) -> Lod {
    LodSelector::default().select(zoom)
}

/// Crossfade between detail levels, held until the new level is loaded.
pub type LodCrossfade = CrossfadeController<Lod>;
