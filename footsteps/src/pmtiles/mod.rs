//! Indexed tile archives.
//!
//! Resolves `(year, z, x, y)` to a byte range inside a single-file archive
//! and reads it through a [`RangeSource`](crate::source::RangeSource).
//!
//! # Layout
//!
//! ```text
//! ┌────────┬──────────┬──────────┬─────────────┬───────────┐
//! │ header │ root dir │ metadata │ leaf dirs   │ tile data │
//! │ 127 B  │          │ (JSON)   │ (optional)  │           │
//! └────────┴──────────┴──────────┴─────────────┴───────────┘
//! ```
//!
//! Tiles are addressed by Hilbert tile id; see [`zxy_to_tile_id`].

mod archive;
mod directory;
mod error;
mod header;
mod registry;
mod tile_id;
mod writer;

pub use archive::{TileArchive, TileData, DEFAULT_LEAF_CACHE_SIZE};
pub use directory::{
    deserialize_directory, find_tile, read_varint, serialize_directory, write_varint, Entry,
    MAX_DIRECTORY_DEPTH,
};
pub use error::ArchiveError;
pub use header::{
    is_gzip, Compression, Header, TileType, GZIP_MAGIC, HEADER_SIZE, INITIAL_READ_LENGTH,
};
pub use registry::{
    ArchiveId, ArchiveRegistry, ArchiveShape, HttpSourceFactory, LocalSourceFactory,
    SourceFactory, ARCHIVE_EXTENSION, ARCHIVE_PREFIX, DEFAULT_ARCHIVE_CAPACITY,
};
pub use tile_id::{tile_id_to_zxy, zxy_to_tile_id};
pub use writer::ArchiveWriter;
