//! Archive and cache file naming.
//!
//! Cached archives are stored as `{key}-{basename}` where `key` is the first
//! 16 hex digits of the SHA-256 of the origin URL. The basename keeps the
//! cache directory readable; the key keeps origins apart.

use std::sync::OnceLock;

use regex::Regex;
use sha2::{Digest, Sha256};

use crate::coord::Year;
use crate::lod::Lod;

/// Extension of SQLite tile archives.
pub const MBTILES_EXTENSION: &str = "mbtiles";

const KEY_LEN: usize = 16;

/// Parsed name of a cached archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachedArchiveName {
    pub year: Year,
    /// `None` for a combined archive.
    pub lod: Option<Lod>,
}

/// Stable cache file name for an archive URL.
pub fn cache_file_name(url: &str) -> String {
    let digest = Sha256::digest(url.as_bytes());
    let key = hex::encode(digest);
    let basename = url
        .rsplit('/')
        .next()
        .filter(|name| !name.is_empty())
        .unwrap_or("archive.mbtiles");
    let basename: String = basename
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("{}-{}", &key[..KEY_LEN], basename)
}

/// Pattern: `<16 hex>-humans_<year>[_lod_<lod>].mbtiles`
fn cache_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^[0-9a-f]{16}-humans_(-?\d+)(?:_lod_(\d))?\.mbtiles$").ok())
        .as_ref()
}

/// Parses a cache file name back into its year and LOD.
pub fn parse_cache_file_name(name: &str) -> Option<CachedArchiveName> {
    let captures = cache_pattern()?.captures(name)?;
    let year = captures.get(1)?.as_str().parse().ok()?;
    let lod = match captures.get(2) {
        Some(m) => Some(Lod::new(m.as_str().parse().ok()?)?),
        None => None,
    };
    Some(CachedArchiveName { year, lod })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_name_is_stable_and_distinct() {
        let a = cache_file_name("https://a.example/tiles/humans_1500.mbtiles");
        let b = cache_file_name("https://b.example/tiles/humans_1500.mbtiles");
        assert_eq!(a, cache_file_name("https://a.example/tiles/humans_1500.mbtiles"));
        assert_ne!(a, b);
        assert!(a.ends_with("-humans_1500.mbtiles"));
        assert_eq!(a.len(), 17 + "humans_1500.mbtiles".len());
    }

    #[test]
    fn test_parse_round_trip() {
        let name = cache_file_name("http://o/humans_-3000_lod_2.mbtiles");
        assert_eq!(
            parse_cache_file_name(&name),
            Some(CachedArchiveName {
                year: -3000,
                lod: Some(Lod::LOCAL)
            })
        );

        let combined = cache_file_name("http://o/humans_1800.mbtiles");
        assert_eq!(parse_cache_file_name(&combined).unwrap().lod, None);
    }

    #[test]
    fn test_parse_rejects_foreign_files() {
        assert_eq!(parse_cache_file_name(".download-abc"), None);
        assert_eq!(parse_cache_file_name("0123456789abcdef-humans_1_lod_9.mbtiles"), None);
    }

    #[test]
    fn test_unsafe_characters_replaced() {
        let name = cache_file_name("http://o/a b?c.mbtiles");
        assert!(name.ends_with("-a_b_c.mbtiles"));
    }
}
