//! Archive header (v3) and compression handling.
//!
//! The header is a fixed 127-byte little-endian record at offset 0:
//!
//! ```text
//! 0   magic "PMTiles" + version u8 (3)
//! 8   root dir offset/len      24  metadata offset/len
//! 40  leaf dirs offset/len     56  tile data offset/len
//! 72  addressed/entries/contents counts
//! 96  clustered, internal compression, tile compression, tile type
//! 100 min/max zoom, bounds (e7), center zoom, center (e7)
//! ```

use std::io::Read;

use flate2::read::GzDecoder;

use super::error::ArchiveError;

/// Size of the fixed header.
pub const HEADER_SIZE: usize = 127;

/// Bytes fetched on first access: header plus (usually) the root directory.
pub const INITIAL_READ_LENGTH: u64 = 16_384;

const MAGIC: &[u8; 7] = b"PMTiles";
const VERSION: u8 = 3;

/// Gzip magic bytes.
pub const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Whether `data` starts with the gzip magic bytes.
#[inline]
pub fn is_gzip(data: &[u8]) -> bool {
    data.len() >= 2 && data[..2] == GZIP_MAGIC
}

/// Compression of directories or tile payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    Unknown,
    None,
    Gzip,
    Brotli,
    Zstd,
}

impl Compression {
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => Compression::None,
            2 => Compression::Gzip,
            3 => Compression::Brotli,
            4 => Compression::Zstd,
            _ => Compression::Unknown,
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            Compression::Unknown => 0,
            Compression::None => 1,
            Compression::Gzip => 2,
            Compression::Brotli => 3,
            Compression::Zstd => 4,
        }
    }

    /// Decompresses `data`. `Unknown` sniffs for gzip.
    pub fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, ArchiveError> {
        match self {
            Compression::None => Ok(data.to_vec()),
            Compression::Gzip => gunzip(data),
            Compression::Unknown if is_gzip(data) => gunzip(data),
            Compression::Unknown => Ok(data.to_vec()),
            other => Err(ArchiveError::UnsupportedCompression(format!("{:?}", other))),
        }
    }
}

fn gunzip(data: &[u8]) -> Result<Vec<u8>, ArchiveError> {
    let mut out = Vec::with_capacity(data.len() * 4);
    GzDecoder::new(data)
        .read_to_end(&mut out)
        .map_err(|e| ArchiveError::CorruptDirectory(format!("gzip: {}", e)))?;
    Ok(out)
}

/// Type of the tiles stored in the archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileType {
    Unknown,
    Mvt,
    Png,
    Jpeg,
    Webp,
    Avif,
}

impl TileType {
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => TileType::Mvt,
            2 => TileType::Png,
            3 => TileType::Jpeg,
            4 => TileType::Webp,
            5 => TileType::Avif,
            _ => TileType::Unknown,
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            TileType::Unknown => 0,
            TileType::Mvt => 1,
            TileType::Png => 2,
            TileType::Jpeg => 3,
            TileType::Webp => 4,
            TileType::Avif => 5,
        }
    }
}

/// Parsed archive header.
#[derive(Debug, Clone, PartialEq)]
pub struct Header {
    pub root_dir_offset: u64,
    pub root_dir_length: u64,
    pub metadata_offset: u64,
    pub metadata_length: u64,
    pub leaf_dirs_offset: u64,
    pub leaf_dirs_length: u64,
    pub tile_data_offset: u64,
    pub tile_data_length: u64,
    pub addressed_tiles: u64,
    pub tile_entries: u64,
    pub tile_contents: u64,
    pub clustered: bool,
    pub internal_compression: Compression,
    pub tile_compression: Compression,
    pub tile_type: TileType,
    pub min_zoom: u8,
    pub max_zoom: u8,
    pub min_lon_e7: i32,
    pub min_lat_e7: i32,
    pub max_lon_e7: i32,
    pub max_lat_e7: i32,
    pub center_zoom: u8,
    pub center_lon_e7: i32,
    pub center_lat_e7: i32,
}

impl Header {
    /// Parses the header from the first bytes of an archive.
    pub fn parse(bytes: &[u8]) -> Result<Self, ArchiveError> {
        if bytes.len() < HEADER_SIZE {
            return Err(ArchiveError::InvalidHeader(format!(
                "need {} bytes, got {}",
                HEADER_SIZE,
                bytes.len()
            )));
        }
        if &bytes[..7] != MAGIC {
            return Err(ArchiveError::InvalidHeader("bad magic".to_string()));
        }
        if bytes[7] != VERSION {
            return Err(ArchiveError::InvalidHeader(format!(
                "unsupported version {}",
                bytes[7]
            )));
        }

        Ok(Self {
            root_dir_offset: read_u64(bytes, 8),
            root_dir_length: read_u64(bytes, 16),
            metadata_offset: read_u64(bytes, 24),
            metadata_length: read_u64(bytes, 32),
            leaf_dirs_offset: read_u64(bytes, 40),
            leaf_dirs_length: read_u64(bytes, 48),
            tile_data_offset: read_u64(bytes, 56),
            tile_data_length: read_u64(bytes, 64),
            addressed_tiles: read_u64(bytes, 72),
            tile_entries: read_u64(bytes, 80),
            tile_contents: read_u64(bytes, 88),
            clustered: bytes[96] == 1,
            internal_compression: Compression::from_u8(bytes[97]),
            tile_compression: Compression::from_u8(bytes[98]),
            tile_type: TileType::from_u8(bytes[99]),
            min_zoom: bytes[100],
            max_zoom: bytes[101],
            min_lon_e7: read_i32(bytes, 102),
            min_lat_e7: read_i32(bytes, 106),
            max_lon_e7: read_i32(bytes, 110),
            max_lat_e7: read_i32(bytes, 114),
            center_zoom: bytes[118],
            center_lon_e7: read_i32(bytes, 119),
            center_lat_e7: read_i32(bytes, 123),
        })
    }

    /// Serializes the header. Used when writing archives and fixtures.
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[..7].copy_from_slice(MAGIC);
        out[7] = VERSION;
        let u64_fields = [
            self.root_dir_offset,
            self.root_dir_length,
            self.metadata_offset,
            self.metadata_length,
            self.leaf_dirs_offset,
            self.leaf_dirs_length,
            self.tile_data_offset,
            self.tile_data_length,
            self.addressed_tiles,
            self.tile_entries,
            self.tile_contents,
        ];
        for (i, value) in u64_fields.iter().enumerate() {
            let at = 8 + i * 8;
            out[at..at + 8].copy_from_slice(&value.to_le_bytes());
        }
        out[96] = u8::from(self.clustered);
        out[97] = self.internal_compression.as_u8();
        out[98] = self.tile_compression.as_u8();
        out[99] = self.tile_type.as_u8();
        out[100] = self.min_zoom;
        out[101] = self.max_zoom;
        out[102..106].copy_from_slice(&self.min_lon_e7.to_le_bytes());
        out[106..110].copy_from_slice(&self.min_lat_e7.to_le_bytes());
        out[110..114].copy_from_slice(&self.max_lon_e7.to_le_bytes());
        out[114..118].copy_from_slice(&self.max_lat_e7.to_le_bytes());
        out[118] = self.center_zoom;
        out[119..123].copy_from_slice(&self.center_lon_e7.to_le_bytes());
        out[123..127].copy_from_slice(&self.center_lat_e7.to_le_bytes());
        out
    }
}

fn read_u64(bytes: &[u8], at: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[at..at + 8]);
    u64::from_le_bytes(buf)
}

fn read_i32(bytes: &[u8], at: usize) -> i32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[at..at + 4]);
    i32::from_le_bytes(buf)
}
