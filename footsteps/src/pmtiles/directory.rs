//! Directory encoding.
//!
//! A directory is a varint stream laid out column-wise:
//!
//! ```text
//! count | tile_id deltas... | run_lengths... | lengths... | offsets...
//! ```
//!
//! An offset of `0` (after the first entry) means "immediately after the
//! previous entry"; any other value is the offset plus one. An entry with
//! `run_length == 0` points at a leaf directory instead of tile data.

use super::error::ArchiveError;

/// Maximum directory depth (root + leaves) followed during lookup.
pub const MAX_DIRECTORY_DEPTH: usize = 4;

/// One directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Entry {
    pub tile_id: u64,
    pub offset: u64,
    pub length: u32,
    pub run_length: u32,
}

impl Entry {
    /// Whether this entry points at a leaf directory.
    pub fn is_leaf(&self) -> bool {
        self.run_length == 0
    }
}

/// Reads an unsigned LEB128 varint.
pub fn read_varint(buf: &[u8], pos: &mut usize) -> Result<u64, ArchiveError> {
    let mut value = 0u64;
    let mut shift = 0u32;
    loop {
        let byte = *buf
            .get(*pos)
            .ok_or_else(|| ArchiveError::CorruptDirectory("truncated varint".to_string()))?;
        *pos += 1;
        if shift >= 64 {
            return Err(ArchiveError::CorruptDirectory(
                "varint overflow".to_string(),
            ));
        }
        value |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
    }
}

/// Appends an unsigned LEB128 varint.
pub fn write_varint(out: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        out.push((value as u8) | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}

/// Decodes an (already decompressed) directory.
pub fn deserialize_directory(buf: &[u8]) -> Result<Vec<Entry>, ArchiveError> {
    let mut pos = 0usize;
    let count = read_varint(buf, &mut pos)? as usize;
    // Every entry needs at least four bytes; reject absurd counts early.
    if count > buf.len() {
        return Err(ArchiveError::CorruptDirectory(format!(
            "entry count {} exceeds directory size {}",
            count,
            buf.len()
        )));
    }

    let mut entries = vec![
        Entry {
            tile_id: 0,
            offset: 0,
            length: 0,
            run_length: 0,
        };
        count
    ];

    let mut last_id = 0u64;
    for entry in entries.iter_mut() {
        last_id = last_id
            .checked_add(read_varint(buf, &mut pos)?)
            .ok_or_else(|| ArchiveError::CorruptDirectory("tile id overflow".to_string()))?;
        entry.tile_id = last_id;
    }
    for entry in entries.iter_mut() {
        entry.run_length = to_u32(read_varint(buf, &mut pos)?)?;
    }
    for entry in entries.iter_mut() {
        entry.length = to_u32(read_varint(buf, &mut pos)?)?;
    }
    for i in 0..count {
        let value = read_varint(buf, &mut pos)?;
        entries[i].offset = match (value, i) {
            (0, 0) => {
                return Err(ArchiveError::CorruptDirectory(
                    "first entry has relative offset".to_string(),
                ))
            }
            (0, _) => entries[i - 1].offset + u64::from(entries[i - 1].length),
            (v, _) => v - 1,
        };
    }
    Ok(entries)
}

/// Encodes a directory (uncompressed).
pub fn serialize_directory(entries: &[Entry]) -> Vec<u8> {
    let mut out = Vec::with_capacity(entries.len() * 8 + 4);
    write_varint(&mut out, entries.len() as u64);

    let mut last_id = 0u64;
    for entry in entries {
        write_varint(&mut out, entry.tile_id - last_id);
        last_id = entry.tile_id;
    }
    for entry in entries {
        write_varint(&mut out, u64::from(entry.run_length));
    }
    for entry in entries {
        write_varint(&mut out, u64::from(entry.length));
    }
    for (i, entry) in entries.iter().enumerate() {
        let contiguous =
            i > 0 && entry.offset == entries[i - 1].offset + u64::from(entries[i - 1].length);
        write_varint(&mut out, if contiguous { 0 } else { entry.offset + 1 });
    }
    out
}

/// Finds the entry covering `tile_id`: an exact match, a run containing it,
/// or the leaf directory whose range starts before it.
pub fn find_tile(entries: &[Entry], tile_id: u64) -> Option<&Entry> {
    let idx = match entries.binary_search_by_key(&tile_id, |e| e.tile_id) {
        Ok(idx) => return entries.get(idx),
        Err(0) => return None,
        Err(insert_at) => insert_at - 1,
    };

    let candidate = &entries[idx];
    if candidate.is_leaf() || tile_id - candidate.tile_id < u64::from(candidate.run_length) {
        Some(candidate)
    } else {
        None
    }
}

fn to_u32(value: u64) -> Result<u32, ArchiveError> {
    u32::try_from(value)
        .map_err(|_| ArchiveError::CorruptDirectory(format!("value {} exceeds u32", value)))
}
