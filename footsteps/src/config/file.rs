//! INI configuration file.
//!
//! Loaded from `~/.footsteps/config.ini`. Every key is optional; a missing
//! file yields the defaults, so the core runs with zero configuration.
//!
//! ```ini
//! [origin]
//! base_url = https://tiles.example.org
//! tile_prefix = v2
//!
//! [cache]
//! max_entries = 1024
//! max_bytes = 268435456
//! directory = /var/cache/footsteps
//!
//! [fetch]
//! max_concurrency = 6
//! cache_bust = true
//! trusted_hosts = tiles.example.org, cdn.example.org
//!
//! [server]
//! bind = 127.0.0.1:8080
//! upstream = https://tiles.example.org
//! mbtiles_origin = https://tiles.example.org/mbtiles
//! sqlite_binary = sqlite3
//! cli_workers = 4
//!
//! [logging]
//! level = info
//! file = /var/log/footsteps/footsteps.log
//! ```
//!
//! Environment variables are applied on top of the file; see
//! [`ConfigFile::apply_env`].

use std::fmt::Display;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use ini::{Ini, Properties};
use tracing::debug;

use super::error::ConfigError;
use crate::cache::{DEFAULT_MAX_BYTES, DEFAULT_MAX_ENTRIES};
use crate::mbtiles::{DEFAULT_CLI_WORKERS, DEFAULT_SQLITE_BINARY};
use crate::pipeline::DEFAULT_MAX_CONCURRENCY;

/// Default archive origin.
pub const DEFAULT_ORIGIN_URL: &str = "http://localhost:8080/tiles";

/// Default server bind address.
pub const DEFAULT_BIND: &str = "127.0.0.1:8080";

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

pub const ENV_ORIGIN_URL: &str = "FOOTSTEPS_ORIGIN_URL";
pub const ENV_CACHE_MAX_ENTRIES: &str = "FOOTSTEPS_CACHE_MAX_ENTRIES";
pub const ENV_CACHE_MAX_BYTES: &str = "FOOTSTEPS_CACHE_MAX_BYTES";
pub const ENV_MAX_CONCURRENCY: &str = "FOOTSTEPS_MAX_CONCURRENCY";
pub const ENV_UPSTREAM: &str = "FOOTSTEPS_UPSTREAM";
pub const ENV_MBTILES_ORIGIN: &str = "FOOTSTEPS_MBTILES_ORIGIN";

/// Directory holding the configuration file.
pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".footsteps")
}

/// Path of the configuration file.
pub fn config_file_path() -> PathBuf {
    config_dir().join("config.ini")
}

fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(config_dir)
        .join("footsteps")
        .join("mbtiles")
}

/// `[origin]`
#[derive(Debug, Clone, PartialEq)]
pub struct OriginSettings {
    pub base_url: String,
    /// Optional path segment between the base URL and archive names.
    pub tile_prefix: Option<String>,
}

impl OriginSettings {
    /// Base location of the archives: `base_url[/tile_prefix]`.
    pub fn archive_base(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        match self.tile_prefix.as_deref().map(|p| p.trim_matches('/')) {
            Some(prefix) if !prefix.is_empty() => format!("{}/{}", base, prefix),
            _ => base.to_string(),
        }
    }
}

/// `[cache]`
#[derive(Debug, Clone, PartialEq)]
pub struct CacheSettings {
    pub max_entries: usize,
    pub max_bytes: usize,
    /// Download cache directory for remote SQLite archives.
    pub directory: PathBuf,
}

/// `[fetch]`
#[derive(Debug, Clone, PartialEq)]
pub struct FetchSettings {
    pub max_concurrency: usize,
    pub cache_bust: bool,
    pub trusted_hosts: Vec<String>,
}

/// `[server]`
#[derive(Debug, Clone, PartialEq)]
pub struct ServerSettings {
    pub bind: SocketAddr,
    /// Upstream of the `/proxy` route. Disabled when unset.
    pub upstream: Option<String>,
    /// Base URL or directory of SQLite archives. Disabled when unset.
    pub mbtiles_origin: Option<String>,
    pub sqlite_binary: String,
    pub cli_workers: usize,
}

/// `[logging]`
#[derive(Debug, Clone, PartialEq)]
pub struct LoggingSettings {
    pub level: String,
    pub file: Option<PathBuf>,
}

/// The whole configuration file.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigFile {
    pub origin: OriginSettings,
    pub cache: CacheSettings,
    pub fetch: FetchSettings,
    pub server: ServerSettings,
    pub logging: LoggingSettings,
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            origin: OriginSettings {
                base_url: DEFAULT_ORIGIN_URL.to_string(),
                tile_prefix: None,
            },
            cache: CacheSettings {
                max_entries: DEFAULT_MAX_ENTRIES,
                max_bytes: DEFAULT_MAX_BYTES,
                directory: default_cache_dir(),
            },
            fetch: FetchSettings {
                max_concurrency: DEFAULT_MAX_CONCURRENCY,
                cache_bust: false,
                trusted_hosts: Vec::new(),
            },
            server: ServerSettings {
                bind: SocketAddr::from(([127, 0, 0, 1], 8080)),
                upstream: None,
                mbtiles_origin: None,
                sqlite_binary: DEFAULT_SQLITE_BINARY.to_string(),
                cli_workers: DEFAULT_CLI_WORKERS,
            },
            logging: LoggingSettings {
                level: DEFAULT_LOG_LEVEL.to_string(),
                file: None,
            },
        }
    }
}

impl ConfigFile {
    /// Loads the default file and applies environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::load_from(&config_file_path())?;
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Loads `path`; a missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }
        let ini = Ini::load_from_file(path)?;
        Self::from_ini(&ini)
    }

    /// Parses INI text.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let ini = Ini::load_from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        Self::from_ini(&ini)
    }

    fn from_ini(ini: &Ini) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(section) = ini.section(Some("origin")) {
            if let Some(v) = non_empty(section, "base_url") {
                config.origin.base_url = v.to_string();
            }
            config.origin.tile_prefix = non_empty(section, "tile_prefix").map(str::to_string);
        }

        if let Some(section) = ini.section(Some("cache")) {
            parse_into(section, "cache.max_entries", &mut config.cache.max_entries)?;
            parse_into(section, "cache.max_bytes", &mut config.cache.max_bytes)?;
            if let Some(v) = non_empty(section, "directory") {
                config.cache.directory = expand_tilde(v);
            }
        }

        if let Some(section) = ini.section(Some("fetch")) {
            parse_into(section, "fetch.max_concurrency", &mut config.fetch.max_concurrency)?;
            if let Some(v) = non_empty(section, "cache_bust") {
                config.fetch.cache_bust = parse_bool("fetch.cache_bust", v)?;
            }
            if let Some(v) = non_empty(section, "trusted_hosts") {
                config.fetch.trusted_hosts = v
                    .split(',')
                    .map(str::trim)
                    .filter(|h| !h.is_empty())
                    .map(str::to_string)
                    .collect();
            }
        }

        if let Some(section) = ini.section(Some("server")) {
            parse_into(section, "server.bind", &mut config.server.bind)?;
            config.server.upstream = non_empty(section, "upstream").map(str::to_string);
            config.server.mbtiles_origin =
                non_empty(section, "mbtiles_origin").map(str::to_string);
            if let Some(v) = non_empty(section, "sqlite_binary") {
                config.server.sqlite_binary = v.to_string();
            }
            parse_into(section, "server.cli_workers", &mut config.server.cli_workers)?;
        }

        if let Some(section) = ini.section(Some("logging")) {
            if let Some(v) = non_empty(section, "level") {
                config.logging.level = v.to_string();
            }
            config.logging.file = non_empty(section, "file").map(expand_tilde);
        }

        config.validate()?;
        Ok(config)
    }

    /// Applies environment overrides. `lookup` reads one variable.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get(ENV_ORIGIN_URL) {
            self.origin.base_url = v;
        }
        if let Some(v) = get(ENV_CACHE_MAX_ENTRIES) {
            self.cache.max_entries = parse_value(ENV_CACHE_MAX_ENTRIES, &v)?;
        }
        if let Some(v) = get(ENV_CACHE_MAX_BYTES) {
            self.cache.max_bytes = parse_value(ENV_CACHE_MAX_BYTES, &v)?;
        }
        if let Some(v) = get(ENV_MAX_CONCURRENCY) {
            self.fetch.max_concurrency = parse_value(ENV_MAX_CONCURRENCY, &v)?;
        }
        if let Some(v) = get(ENV_UPSTREAM) {
            self.server.upstream = Some(v);
        }
        if let Some(v) = get(ENV_MBTILES_ORIGIN) {
            self.server.mbtiles_origin = Some(v);
        }
        self.validate()
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.cache.max_entries == 0 {
            return Err(ConfigError::invalid("cache.max_entries", "0", "must be positive"));
        }
        if self.cache.max_bytes == 0 {
            return Err(ConfigError::invalid("cache.max_bytes", "0", "must be positive"));
        }
        if self.fetch.max_concurrency == 0 {
            return Err(ConfigError::invalid("fetch.max_concurrency", "0", "must be positive"));
        }
        Ok(())
    }

    /// Renders the configuration as INI.
    pub fn to_ini(&self) -> Ini {
        let mut ini = Ini::new();
        ini.with_section(Some("origin"))
            .set("base_url", self.origin.base_url.as_str())
            .set("tile_prefix", self.origin.tile_prefix.clone().unwrap_or_default());
        ini.with_section(Some("cache"))
            .set("max_entries", self.cache.max_entries.to_string())
            .set("max_bytes", self.cache.max_bytes.to_string())
            .set("directory", self.cache.directory.display().to_string());
        ini.with_section(Some("fetch"))
            .set("max_concurrency", self.fetch.max_concurrency.to_string())
            .set("cache_bust", self.fetch.cache_bust.to_string())
            .set("trusted_hosts", self.fetch.trusted_hosts.join(", "));
        ini.with_section(Some("server"))
            .set("bind", self.server.bind.to_string())
            .set("upstream", self.server.upstream.clone().unwrap_or_default())
            .set(
                "mbtiles_origin",
                self.server.mbtiles_origin.clone().unwrap_or_default(),
            )
            .set("sqlite_binary", self.server.sqlite_binary.as_str())
            .set("cli_workers", self.server.cli_workers.to_string());
        ini.with_section(Some("logging"))
            .set("level", self.logging.level.as_str())
            .set(
                "file",
                self.logging
                    .file
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_default(),
            );
        ini
    }

    /// Writes the configuration to `path`, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        self.to_ini().write_to_file(path)?;
        Ok(())
    }

    /// Writes the configuration to the default path.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&config_file_path())
    }
}

fn non_empty<'a>(section: &'a Properties, key: &str) -> Option<&'a str> {
    section.get(key).map(str::trim).filter(|v| !v.is_empty())
}

fn parse_into<T>(section: &Properties, qualified: &str, target: &mut T) -> Result<(), ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    let key = qualified.rsplit('.').next().unwrap_or(qualified);
    if let Some(v) = non_empty(section, key) {
        *target = parse_value(qualified, v)?;
    }
    Ok(())
}

fn parse_value<T>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::invalid(key, value, e))
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        _ => Err(ConfigError::invalid(key, value, "expected true or false")),
    }
}

fn expand_tilde(value: &str) -> PathBuf {
    match value.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(value)),
        None => PathBuf::from(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = ConfigFile::default();
        assert_eq!(config.origin.base_url, DEFAULT_ORIGIN_URL);
        assert_eq!(config.cache.max_entries, 1024);
        assert_eq!(config.cache.max_bytes, 256 * 1024 * 1024);
        assert_eq!(config.fetch.max_concurrency, 6);
        assert_eq!(config.server.bind.to_string(), DEFAULT_BIND);
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ConfigFile::load_from(&dir.path().join("absent.ini")).unwrap();
        assert_eq!(config, ConfigFile::default());
    }

    #[test]
    fn test_parse_sections() {
        let config = ConfigFile::parse(
            "[origin]\nbase_url = https://t.example/\ntile_prefix = v2\n\
             [cache]\nmax_entries = 10\n\
             [fetch]\ncache_bust = yes\ntrusted_hosts = a.example, b.example\n\
             [server]\nbind = 0.0.0.0:9000\nupstream = https://up.example\n",
        )
        .unwrap();
        assert_eq!(config.origin.archive_base(), "https://t.example/v2");
        assert_eq!(config.cache.max_entries, 10);
        assert!(config.fetch.cache_bust);
        assert_eq!(config.fetch.trusted_hosts, vec!["a.example", "b.example"]);
        assert_eq!(config.server.bind.port(), 9000);
        assert_eq!(config.server.upstream.as_deref(), Some("https://up.example"));
        assert_eq!(config.server.mbtiles_origin, None);
    }

    #[test]
    fn test_invalid_number_is_rejected() {
        let err = ConfigFile::parse("[cache]\nmax_bytes = lots\n").unwrap_err();
        assert!(err.to_string().contains("cache.max_bytes"));
    }

    #[test]
    fn test_zero_concurrency_is_rejected() {
        assert!(ConfigFile::parse("[fetch]\nmax_concurrency = 0\n").is_err());
    }

    #[test]
    fn test_env_overrides_file() {
        let mut config = ConfigFile::parse("[fetch]\nmax_concurrency = 3\n").unwrap();
        let env: HashMap<&str, &str> = [
            (ENV_MAX_CONCURRENCY, "8"),
            (ENV_ORIGIN_URL, "https://env.example"),
            (ENV_MBTILES_ORIGIN, " "),
        ]
        .into_iter()
        .collect();
        config
            .apply_env(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.fetch.max_concurrency, 8);
        assert_eq!(config.origin.base_url, "https://env.example");
        assert_eq!(config.server.mbtiles_origin, None);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.ini");
        let mut config = ConfigFile::default();
        config.server.mbtiles_origin = Some("/srv/mbtiles".to_string());
        config.logging.file = Some(dir.path().join("footsteps.log"));
        config.save_to(&path).unwrap();

        assert_eq!(ConfigFile::load_from(&path).unwrap(), config);
    }
}
