//! Archive writer.
//!
//! Packs already-encoded tiles into a single clustered archive. Large tile
//! sets are split into one level of leaf directories so the root stays
//! inside the initial read.

use std::collections::BTreeMap;
use std::io::Write;

use flate2::write::GzEncoder;

use super::directory::{serialize_directory, Entry};
use super::error::ArchiveError;
use super::header::{Compression, Header, TileType, HEADER_SIZE};
use super::tile_id::zxy_to_tile_id;
use crate::coord::TileCoord;

/// Builds an archive in memory.
#[derive(Debug, Clone)]
pub struct ArchiveWriter {
    tiles: BTreeMap<u64, Vec<u8>>,
    tile_type: TileType,
    tile_compression: Compression,
    internal_compression: Compression,
    leaf_size: usize,
    metadata: serde_json::Value,
}

impl Default for ArchiveWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl ArchiveWriter {
    pub fn new() -> Self {
        Self {
            tiles: BTreeMap::new(),
            tile_type: TileType::Mvt,
            tile_compression: Compression::Gzip,
            internal_compression: Compression::Gzip,
            leaf_size: 4096,
            metadata: serde_json::json!({}),
        }
    }

    /// Compression recorded for tile payloads. Payloads are stored as given.
    pub fn with_tile_compression(mut self, compression: Compression) -> Self {
        self.tile_compression = compression;
        self
    }

    /// Compression applied to directories and metadata (`None` or `Gzip`).
    pub fn with_internal_compression(mut self, compression: Compression) -> Self {
        self.internal_compression = compression;
        self
    }

    /// Maximum entries per directory before leaves are used.
    pub fn with_leaf_size(mut self, leaf_size: usize) -> Self {
        self.leaf_size = leaf_size.max(1);
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn add_tile(&mut self, coord: TileCoord, data: Vec<u8>) -> Result<(), ArchiveError> {
        let tile_id = zxy_to_tile_id(coord)?;
        self.tiles.insert(tile_id, data);
        Ok(())
    }

    /// Serializes the archive.
    pub fn finish(self) -> Result<Vec<u8>, ArchiveError> {
        let mut tile_data = Vec::new();
        let mut entries: Vec<Entry> = Vec::with_capacity(self.tiles.len());
        let mut by_content: BTreeMap<&[u8], (u64, u32)> = BTreeMap::new();

        for (tile_id, data) in &self.tiles {
            let length = u32::try_from(data.len())
                .map_err(|_| ArchiveError::Decode(format!("tile {} too large", tile_id)))?;
            let offset = match by_content.get(data.as_slice()) {
                Some((offset, _)) => *offset,
                None => {
                    let offset = tile_data.len() as u64;
                    tile_data.extend_from_slice(data);
                    by_content.insert(data.as_slice(), (offset, length));
                    offset
                }
            };

            // Extend a run when the previous id repeats the same content.
            if let Some(last) = entries.last_mut() {
                if last.offset == offset
                    && last.length == length
                    && last.tile_id + u64::from(last.run_length) == *tile_id
                {
                    last.run_length += 1;
                    continue;
                }
            }
            entries.push(Entry {
                tile_id: *tile_id,
                offset,
                length,
                run_length: 1,
            });
        }

        let (root, leaves) = if entries.len() <= self.leaf_size {
            (self.compress(&serialize_directory(&entries))?, Vec::new())
        } else {
            let mut leaves = Vec::new();
            let mut root_entries = Vec::new();
            for chunk in entries.chunks(self.leaf_size) {
                let encoded = self.compress(&serialize_directory(chunk))?;
                root_entries.push(Entry {
                    tile_id: chunk[0].tile_id,
                    offset: leaves.len() as u64,
                    length: encoded.len() as u32,
                    run_length: 0,
                });
                leaves.extend_from_slice(&encoded);
            }
            (self.compress(&serialize_directory(&root_entries))?, leaves)
        };

        let metadata = self.compress(self.metadata.to_string().as_bytes())?;

        let root_dir_offset = HEADER_SIZE as u64;
        let metadata_offset = root_dir_offset + root.len() as u64;
        let leaf_dirs_offset = metadata_offset + metadata.len() as u64;
        let tile_data_offset = leaf_dirs_offset + leaves.len() as u64;

        let (min_zoom, max_zoom) = self.zoom_range()?;
        let header = Header {
            root_dir_offset,
            root_dir_length: root.len() as u64,
            metadata_offset,
            metadata_length: metadata.len() as u64,
            leaf_dirs_offset,
            leaf_dirs_length: leaves.len() as u64,
            tile_data_offset,
            tile_data_length: tile_data.len() as u64,
            addressed_tiles: self.tiles.len() as u64,
            tile_entries: entries.len() as u64,
            tile_contents: by_content.len() as u64,
            clustered: true,
            internal_compression: self.internal_compression,
            tile_compression: self.tile_compression,
            tile_type: self.tile_type,
            min_zoom,
            max_zoom,
            min_lon_e7: -1_800_000_000,
            min_lat_e7: -850_511_287,
            max_lon_e7: 1_800_000_000,
            max_lat_e7: 850_511_287,
            center_zoom: min_zoom,
            center_lon_e7: 0,
            center_lat_e7: 0,
        };

        let mut out = Vec::with_capacity(tile_data_offset as usize + tile_data.len());
        out.extend_from_slice(&header.to_bytes());
        out.extend_from_slice(&root);
        out.extend_from_slice(&metadata);
        out.extend_from_slice(&leaves);
        out.extend_from_slice(&tile_data);
        Ok(out)
    }

    fn zoom_range(&self) -> Result<(u8, u8), ArchiveError> {
        let first = self.tiles.keys().next().copied().unwrap_or(0);
        let last = self.tiles.keys().next_back().copied().unwrap_or(0);
        let min = super::tile_id::tile_id_to_zxy(first)?.z;
        let max = super::tile_id::tile_id_to_zxy(last)?.z;
        Ok((min, max))
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, ArchiveError> {
        match self.internal_compression {
            Compression::None => Ok(data.to_vec()),
            Compression::Gzip => {
                let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
                encoder
                    .write_all(data)
                    .and_then(|_| encoder.finish())
                    .map_err(|e| ArchiveError::CorruptDirectory(format!("gzip: {}", e)))
            }
            other => Err(ArchiveError::UnsupportedCompression(format!("{:?}", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pmtiles::directory::deserialize_directory;

    #[test]
    fn test_duplicate_tiles_form_a_run() {
        let mut writer = ArchiveWriter::new().with_internal_compression(Compression::None);
        // ids 1..=4 are all of zoom 1
        for (x, y) in [(0, 0), (0, 1), (1, 1), (1, 0)] {
            writer.add_tile(TileCoord { z: 1, x, y }, vec![7; 4]).unwrap();
        }
        let bytes = writer.finish().unwrap();
        let header = Header::parse(&bytes).unwrap();
        let start = header.root_dir_offset as usize;
        let root =
            deserialize_directory(&bytes[start..start + header.root_dir_length as usize]).unwrap();

        assert_eq!(root.len(), 1);
        assert_eq!(root[0].run_length, 4);
        assert_eq!(header.tile_contents, 1);
        assert_eq!(header.min_zoom, 1);
    }

    #[test]
    fn test_leaf_split() {
        let mut writer = ArchiveWriter::new().with_leaf_size(2);
        for x in 0..4 {
            writer
                .add_tile(TileCoord { z: 2, x, y: 0 }, vec![x as u8])
                .unwrap();
        }
        let header = Header::parse(&writer.finish().unwrap()).unwrap();
        assert!(header.leaf_dirs_length > 0);
    }
}
