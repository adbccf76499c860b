//! Persistent download cache for remote archives.
//!
//! Each remote archive is kept as one stable file under the cache
//! directory. A request checks the origin's `Last-Modified` with a HEAD:
//!
//! ```text
//! local missing                       → download (miss)
//! local mtime >= origin modified      → reuse    (hit)
//! local mtime <  origin modified      → download (refresh)
//! HEAD failed, local present          → reuse stale copy (hit, warned)
//! ```
//!
//! A copy confirmed against the origin within the freshness window is
//! reused without another HEAD.
//!
//! Downloads stream into a temp file in the same directory and are renamed
//! into place, so readers never observe a partial file and concurrent
//! writers race safely (last rename wins). Only temp files are ever
//! deleted by a request.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use reqwest::header::LAST_MODIFIED;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use super::error::{MbtilesError, MbtilesResult};
use super::naming::{cache_file_name, parse_cache_file_name, CachedArchiveName};

/// Prefix of in-progress download files.
pub const TEMP_PREFIX: &str = ".download-";

/// How long a copy confirmed against the origin is trusted without a HEAD.
pub const DEFAULT_FRESHNESS_WINDOW: Duration = Duration::from_secs(30);

/// How a request was served from the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheStatus {
    Hit,
    Refresh,
    Miss,
}

impl CacheStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheStatus::Hit => "hit",
            CacheStatus::Refresh => "refresh",
            CacheStatus::Miss => "miss",
        }
    }
}

/// A local copy of a remote archive.
#[derive(Debug, Clone)]
pub struct CachedArchive {
    pub path: PathBuf,
    pub status: CacheStatus,
    pub modified: SystemTime,
}

/// A file found in the cache directory.
#[derive(Debug, Clone, Serialize)]
pub struct CacheEntryInfo {
    pub file_name: String,
    pub size: u64,
    #[serde(skip)]
    pub archive: Option<CachedArchiveName>,
}

/// Downloads remote archives once and keeps them fresh.
#[derive(Debug)]
pub struct DownloadCache {
    dir: PathBuf,
    client: Client,
    locks: DashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>,
    confirmed: DashMap<PathBuf, Instant>,
    freshness: Duration,
}

impl DownloadCache {
    pub fn new(dir: impl Into<PathBuf>, client: Client) -> Self {
        Self {
            dir: dir.into(),
            client,
            locks: DashMap::new(),
            confirmed: DashMap::new(),
            freshness: DEFAULT_FRESHNESS_WINDOW,
        }
    }

    /// Sets how long a confirmed copy skips the origin check. Zero checks
    /// on every request.
    pub fn with_freshness_window(mut self, window: Duration) -> Self {
        self.freshness = window;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Stable local path for `url`.
    pub fn local_path(&self, url: &str) -> PathBuf {
        self.dir.join(cache_file_name(url))
    }

    /// Returns a fresh local copy of `url`, downloading it if needed.
    pub async fn fetch(&self, url: &str) -> MbtilesResult<CachedArchive> {
        let local = self.local_path(url);
        let lock = self
            .locks
            .entry(local.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        let local_modified = modified_time(&local).await;
        if let Some(modified) = local_modified {
            if self.recently_confirmed(&local) {
                debug!(url, "Cached copy within freshness window");
                return Ok(CachedArchive {
                    path: local,
                    status: CacheStatus::Hit,
                    modified,
                });
            }
        }

        let origin_modified = match self.origin_modified(url).await {
            Ok(modified) => modified,
            Err(e @ MbtilesError::NotFound(_)) => return Err(e),
            Err(e) => match local_modified {
                Some(modified) => {
                    warn!(url, error = %e, "Origin check failed, serving cached copy");
                    return Ok(CachedArchive {
                        path: local,
                        status: CacheStatus::Hit,
                        modified,
                    });
                }
                None => return Err(e),
            },
        };

        let status = match (local_modified, origin_modified) {
            (Some(local_mtime), Some(origin)) if local_mtime >= origin => {
                self.confirmed.insert(local.clone(), Instant::now());
                return Ok(CachedArchive {
                    path: local,
                    status: CacheStatus::Hit,
                    modified: local_mtime,
                })
            }
            (Some(local_mtime), None) => {
                self.confirmed.insert(local.clone(), Instant::now());
                return Ok(CachedArchive {
                    path: local,
                    status: CacheStatus::Hit,
                    modified: local_mtime,
                })
            }
            (Some(_), Some(_)) => CacheStatus::Refresh,
            (None, _) => CacheStatus::Miss,
        };

        info!(url, status = status.as_str(), "Downloading archive");
        self.download(url, &local).await?;
        self.confirmed.insert(local.clone(), Instant::now());
        let modified = modified_time(&local).await.unwrap_or_else(SystemTime::now);
        Ok(CachedArchive {
            path: local,
            status,
            modified,
        })
    }

    /// Lists cached archives, skipping in-progress downloads.
    pub async fn entries(&self) -> MbtilesResult<Vec<CacheEntryInfo>> {
        let mut entries = Vec::new();
        let mut dir = match tokio::fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(entries),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = dir.next_entry().await? {
            let file_name = entry.file_name().to_string_lossy().into_owned();
            if file_name.starts_with(TEMP_PREFIX) {
                continue;
            }
            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }
            entries.push(CacheEntryInfo {
                archive: parse_cache_file_name(&file_name),
                file_name,
                size: metadata.len(),
            });
        }
        entries.sort_by(|a, b| a.file_name.cmp(&b.file_name));
        Ok(entries)
    }

    /// Removes every cached archive. Returns the number of files removed.
    pub async fn clear(&self) -> MbtilesResult<usize> {
        let entries = self.entries().await?;
        for entry in &entries {
            tokio::fs::remove_file(self.dir.join(&entry.file_name)).await?;
        }
        self.confirmed.clear();
        Ok(entries.len())
    }

    fn recently_confirmed(&self, local: &Path) -> bool {
        self.confirmed
            .get(local)
            .is_some_and(|at| at.elapsed() < self.freshness)
    }

    async fn origin_modified(&self, url: &str) -> MbtilesResult<Option<SystemTime>> {
        let response = self
            .client
            .head(url)
            .send()
            .await
            .map_err(|e| MbtilesError::DownloadFailure(format!("HEAD {}: {}", url, e)))?;

        match response.status() {
            StatusCode::NOT_FOUND => return Err(MbtilesError::NotFound(url.to_string())),
            status if !status.is_success() => {
                return Err(MbtilesError::DownloadFailure(format!(
                    "HEAD {} returned {}",
                    url, status
                )))
            }
            _ => {}
        }

        Ok(response
            .headers()
            .get(LAST_MODIFIED)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_http_date))
    }

    async fn download(&self, url: &str, dest: &Path) -> MbtilesResult<()> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| MbtilesError::DownloadFailure(format!("GET {}: {}", url, e)))?;
        match response.status() {
            StatusCode::NOT_FOUND => return Err(MbtilesError::NotFound(url.to_string())),
            status if !status.is_success() => {
                return Err(MbtilesError::DownloadFailure(format!(
                    "GET {} returned {}",
                    url, status
                )))
            }
            _ => {}
        }

        // Dropped (and deleted) on any early return below.
        let temp = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .tempfile_in(&self.dir)?;
        let mut file = tokio::fs::File::from_std(temp.reopen()?);

        let mut written = 0u64;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| MbtilesError::DownloadFailure(format!("reading {}: {}", url, e)))?
        {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        temp.persist(dest)
            .map_err(|e| MbtilesError::DownloadFailure(format!("persist {}: {}", url, e.error)))?;
        debug!(url, bytes = written, path = %dest.display(), "Archive cached");
        Ok(())
    }
}

async fn modified_time(path: &Path) -> Option<SystemTime> {
    tokio::fs::metadata(path).await.ok()?.modified().ok()
}

/// Parses an HTTP date (`Wed, 21 Oct 2015 07:28:00 GMT`).
pub fn parse_http_date(value: &str) -> Option<SystemTime> {
    DateTime::parse_from_rfc2822(value)
        .ok()
        .map(|dt| SystemTime::from(dt.with_timezone(&Utc)))
}

/// Formats a time as an HTTP date.
pub fn format_http_date(time: SystemTime) -> String {
    DateTime::<Utc>::from(time)
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, UNIX_EPOCH};

    #[test]
    fn test_http_date_round_trip() {
        let time = UNIX_EPOCH + Duration::from_secs(1_445_412_480);
        let formatted = format_http_date(time);
        assert_eq!(formatted, "Wed, 21 Oct 2015 07:28:00 GMT");
        assert_eq!(parse_http_date(&formatted), Some(time));
    }

    #[test]
    fn test_invalid_http_date() {
        assert_eq!(parse_http_date("yesterday"), None);
    }

    #[tokio::test]
    async fn test_entries_skip_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DownloadCache::new(dir.path(), Client::new());
        let name = cache_file_name("http://o/humans_1500.mbtiles");
        std::fs::write(dir.path().join(&name), b"db").unwrap();
        std::fs::write(dir.path().join(format!("{}x", TEMP_PREFIX)), b"partial").unwrap();

        let entries = cache.entries().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].file_name, name);
        assert_eq!(entries[0].archive.unwrap().year, 1500);

        assert_eq!(cache.clear().await.unwrap(), 1);
        assert!(cache.entries().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_entries_of_missing_dir_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DownloadCache::new(dir.path().join("absent"), Client::new());
        assert!(cache.entries().await.unwrap().is_empty());
    }
}
