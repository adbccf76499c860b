//! Configuration loading.
//!
//! [`ConfigFile`] mirrors `~/.footsteps/config.ini`; the builder-style
//! structs of each subsystem are derived from it by
//! [`AppConfig`](crate::app::AppConfig).

mod error;
mod file;

pub use error::ConfigError;
pub use file::{
    config_dir, config_file_path, CacheSettings, ConfigFile, FetchSettings, LoggingSettings,
    OriginSettings, ServerSettings, DEFAULT_BIND, DEFAULT_LOG_LEVEL, DEFAULT_ORIGIN_URL,
    ENV_CACHE_MAX_BYTES, ENV_CACHE_MAX_ENTRIES, ENV_MAX_CONCURRENCY, ENV_MBTILES_ORIGIN,
    ENV_ORIGIN_URL, ENV_UPSTREAM,
};

/// Formats a byte count for humans (`1.5 MB`).
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(1536), "1.5 KB");
        assert_eq!(format_size(256 * 1024 * 1024), "256.0 MB");
    }
}
