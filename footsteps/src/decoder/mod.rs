//! Tile payload decoding.
//!
//! Every decoder produces the same [`FeatureSet`]. Format variance stays
//! here: payload compression is resolved by sniffing the gzip magic before a
//! decoder sees the bytes, whatever the archive header claims.

mod feature;
mod mvt;

use std::borrow::Cow;

pub use feature::{
    Feature, FeatureSet, Geometry, LonLat, PropertyValue, BYTES_PER_COORD, BYTES_PER_FEATURE,
    BYTES_PER_PROPERTY,
};
pub use mvt::{MvtDecoder, DEFAULT_EXTENT};

use crate::coord::TileCoord;
use crate::pmtiles::{is_gzip, ArchiveError, Compression, TileData};

/// Turns raw tile bytes into features.
pub trait TileDecoder: Send + Sync {
    /// Decodes an uncompressed payload.
    fn decode(&self, coord: TileCoord, data: &[u8]) -> Result<FeatureSet, ArchiveError>;
}

/// Strips payload compression.
pub fn payload(data: &[u8], declared: Compression) -> Result<Cow<'_, [u8]>, ArchiveError> {
    if is_gzip(data) {
        return Compression::Gzip.decompress(data).map(Cow::Owned);
    }
    match declared {
        Compression::Brotli | Compression::Zstd => Err(ArchiveError::UnsupportedCompression(
            format!("{:?}", declared),
        )),
        // Declared gzip without the magic: already inflated by a transport.
        _ => Ok(Cow::Borrowed(data)),
    }
}

/// Decodes a tile read from an archive.
pub fn decode_tile(
    decoder: &dyn TileDecoder,
    coord: TileCoord,
    tile: &TileData,
) -> Result<FeatureSet, ArchiveError> {
    let raw = payload(&tile.data, tile.compression)?;
    decoder.decode(coord, &raw)
}
