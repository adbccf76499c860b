//! Hilbert-curve tile ids.
//!
//! Archives order tiles along a Hilbert curve per zoom level. The id of a
//! tile is the number of tiles on all lower zooms plus its Hilbert index on
//! its own zoom, so ids are unique across the whole pyramid.

use crate::coord::{CoordError, TileCoord, MAX_ZOOM};

/// Number of tiles on all zoom levels below `z`: `(4^z - 1) / 3`.
#[inline]
fn tiles_below(z: u8) -> u64 {
    ((1u64 << (2 * u32::from(z))) - 1) / 3
}

/// Maps a tile to its archive id.
pub fn zxy_to_tile_id(tile: TileCoord) -> Result<u64, CoordError> {
    if tile.z > MAX_ZOOM {
        return Err(CoordError::InvalidZoom(tile.z));
    }
    let size = 1u64 << tile.z;
    let (mut x, mut y) = (u64::from(tile.x), u64::from(tile.y));
    if x >= size || y >= size {
        return Err(CoordError::OutOfRange {
            z: tile.z,
            x: tile.x,
            y: tile.y,
            size,
        });
    }

    let mut d = 0u64;
    let mut s = size / 2;
    while s > 0 {
        let rx = u64::from((x & s) > 0);
        let ry = u64::from((y & s) > 0);
        d += s * s * ((3 * rx) ^ ry);
        rotate(size, &mut x, &mut y, rx, ry);
        s /= 2;
    }
    Ok(tiles_below(tile.z) + d)
}

/// Maps an archive id back to its tile.
pub fn tile_id_to_zxy(tile_id: u64) -> Result<TileCoord, CoordError> {
    let mut z = 0u8;
    while z <= MAX_ZOOM {
        let next = tiles_below(z + 1);
        if tile_id < next {
            let pos = tile_id - tiles_below(z);
            let size = 1u64 << z;
            let (mut x, mut y) = (0u64, 0u64);
            let mut t = pos;
            let mut s = 1u64;
            while s < size {
                let rx = 1 & (t / 2);
                let ry = 1 & (t ^ rx);
                rotate(s, &mut x, &mut y, rx, ry);
                x += s * rx;
                y += s * ry;
                t /= 4;
                s *= 2;
            }
            return Ok(TileCoord {
                z,
                x: x as u32,
                y: y as u32,
            });
        }
        z += 1;
    }
    Err(CoordError::InvalidZoom(z))
}

#[inline]
fn rotate(n: u64, x: &mut u64, y: &mut u64, rx: u64, ry: u64) {
    if ry == 0 {
        if rx == 1 {
            *x = n - 1 - *x;
            *y = n - 1 - *y;
        }
        std::mem::swap(x, y);
    }
}
