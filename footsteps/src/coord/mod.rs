//! Tile coordinate types and conversions.
//!
//! Provides the XYZ tile addressing used by the client pipeline, the flip to
//! the south-up (TMS) row index stored inside MBTiles databases, and the
//! Web Mercator conversions used to place decoded features and to enumerate
//! the tiles covering a viewport.

use std::f64::consts::PI;
use std::fmt;

use thiserror::Error;

/// Maximum zoom level addressable by the tile archives.
pub const MAX_ZOOM: u8 = 26;

/// Maximum latitude representable in Web Mercator.
pub const MAX_LAT: f64 = 85.051_128_78;

/// Minimum latitude representable in Web Mercator.
pub const MIN_LAT: f64 = -85.051_128_78;

/// A year of the settlement timeline. Negative values are BCE.
pub type Year = i32;

/// Errors produced by coordinate validation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoordError {
    #[error("zoom {0} exceeds maximum of {MAX_ZOOM}")]
    InvalidZoom(u8),

    #[error("tile {x}/{y} is outside the {size}x{size} grid at zoom {z}")]
    OutOfRange { z: u8, x: u32, y: u32, size: u64 },
}

/// An XYZ tile address (row 0 at the top, north-up).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileCoord {
    pub z: u8,
    pub x: u32,
    pub y: u32,
}

impl TileCoord {
    /// Creates a validated tile coordinate.
    pub fn new(z: u8, x: u32, y: u32) -> Result<Self, CoordError> {
        if z > MAX_ZOOM {
            return Err(CoordError::InvalidZoom(z));
        }
        let size = 1u64 << z;
        if u64::from(x) >= size || u64::from(y) >= size {
            return Err(CoordError::OutOfRange { z, x, y, size });
        }
        Ok(Self { z, x, y })
    }

    /// Row index in the TMS convention (row 0 at the bottom).
    ///
    /// MBTiles stores `tile_row` south-up, so lookups must flip the XYZ row.
    #[inline]
    pub fn tms_row(&self) -> u32 {
        tms_row(self.z, self.y)
    }

    /// Geographic bounds of the tile as `(west, south, east, north)`.
    pub fn bounds(&self) -> (f64, f64, f64, f64) {
        let (north, west) = tile_to_lat_lon(self.z, f64::from(self.x), f64::from(self.y));
        let (south, east) =
            tile_to_lat_lon(self.z, f64::from(self.x) + 1.0, f64::from(self.y) + 1.0);
        (west, south, east, north)
    }

    /// Converts a position inside the tile (in tile extent units) to lon/lat.
    pub fn local_to_lon_lat(&self, px: f64, py: f64, extent: f64) -> (f64, f64) {
        let fx = f64::from(self.x) + px / extent;
        let fy = f64::from(self.y) + py / extent;
        let (lat, lon) = tile_to_lat_lon(self.z, fx, fy);
        (lon, lat)
    }
}

impl fmt::Display for TileCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.z, self.x, self.y)
    }
}

/// Flips an XYZ row to the TMS row at zoom `z`: `(1 << z) - 1 - y`.
#[inline]
pub fn tms_row(z: u8, y: u32) -> u32 {
    let max = ((1u64 << z) - 1) as u32;
    max - y
}

/// Converts fractional tile coordinates to `(lat, lon)` of that point.
#[inline]
pub fn tile_to_lat_lon(z: u8, x: f64, y: f64) -> (f64, f64) {
    let n = 2.0_f64.powi(i32::from(z));
    let lon = x / n * 360.0 - 180.0;
    let lat_rad = (PI * (1.0 - 2.0 * y / n)).sinh().atan();
    (lat_rad.to_degrees(), lon)
}

/// Converts `(lat, lon)` to fractional tile coordinates at zoom `z`.
///
/// Latitude is clamped to the Web Mercator range first.
#[inline]
pub fn lat_lon_to_tile(lat: f64, lon: f64, z: u8) -> (f64, f64) {
    let n = 2.0_f64.powi(i32::from(z));
    let lat = lat.clamp(MIN_LAT, MAX_LAT);
    let x = (lon + 180.0) / 360.0 * n;
    let lat_rad = lat.to_radians();
    let y = (1.0 - lat_rad.tan().asinh() / PI) / 2.0 * n;
    (x, y)
}

/// A geographic viewport at a given (integer) tile zoom.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
    pub zoom: u8,
}

impl Viewport {
    pub fn new(west: f64, south: f64, east: f64, north: f64, zoom: u8) -> Self {
        Self {
            west,
            south,
            east,
            north,
            zoom: zoom.min(MAX_ZOOM),
        }
    }

    /// The whole world at zoom `z`.
    pub fn world(zoom: u8) -> Self {
        Self::new(-180.0, MIN_LAT, 180.0, MAX_LAT, zoom)
    }

    /// Enumerates the tiles intersecting the viewport, row-major.
    ///
    /// Viewports crossing the antimeridian (`west > east`) wrap around.
    pub fn tiles(&self) -> Vec<TileCoord> {
        let z = self.zoom;
        let max = ((1u64 << z) - 1) as u32;
        let to_index = |v: f64| -> u32 { (v.floor().max(0.0) as u64).min(u64::from(max)) as u32 };

        let (x0, y0) = lat_lon_to_tile(self.north, self.west, z);
        let (x1, y1) = lat_lon_to_tile(self.south, self.east, z);
        let (y_min, y_max) = (to_index(y0), to_index(y1));

        let columns: Vec<u32> = if self.west <= self.east {
            (to_index(x0)..=to_index(x1)).collect()
        } else {
            (to_index(x0)..=max).chain(0..=to_index(x1)).collect()
        };

        let mut tiles = Vec::with_capacity(columns.len() * (y_max - y_min + 1) as usize);
        for y in y_min..=y_max {
            for &x in &columns {
                tiles.push(TileCoord { z, x, y });
            }
        }
        tiles
    }
}
