//! Tile extraction strategies.
//!
//! MBTiles stores rows south-up, so every lookup flips the XYZ row first.
//! Two strategies exist and are tried in order by the service:
//!
//! 1. [`SqlxExtractor`] queries the database through a linked SQLite
//!    binding (feature `native-sqlite`).
//! 2. [`CliExtractor`] runs the `sqlite3` tool and reads the blob back as
//!    hex text, which survives stdio without corruption.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::process::Command;
use tokio::sync::Semaphore;
use tracing::{debug, trace};

use super::error::{MbtilesError, MbtilesResult};
use crate::coord::TileCoord;

/// Default `sqlite3` executable.
pub const DEFAULT_SQLITE_BINARY: &str = "sqlite3";

/// Default number of concurrent `sqlite3` processes.
pub const DEFAULT_CLI_WORKERS: usize = 4;

/// A way of reading one tile blob out of an archive.
pub trait TileExtractor: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Reads the tile at `coord` (XYZ). `Ok(None)` when the row is absent.
    ///
    /// Fails with [`MbtilesError::Unavailable`] when the strategy cannot
    /// run here at all.
    fn extract<'a>(
        &'a self,
        path: &'a Path,
        coord: TileCoord,
    ) -> BoxFuture<'a, MbtilesResult<Option<Vec<u8>>>>;
}

/// Builds the lookup query. Only integers are interpolated.
pub fn tile_query(coord: TileCoord, hex: bool) -> String {
    let column = if hex { "hex(tile_data)" } else { "tile_data" };
    format!(
        "SELECT {} FROM tiles WHERE zoom_level = {} AND tile_column = {} AND tile_row = {} LIMIT 1;",
        column,
        coord.z,
        coord.x,
        coord.tms_row()
    )
}

// =============================================================================
// Native binding
// =============================================================================

/// Extracts tiles through sqlx's SQLite driver.
#[cfg(feature = "native-sqlite")]
#[derive(Debug)]
pub struct SqlxExtractor {
    pools: moka::future::Cache<(PathBuf, u64), sqlx::SqlitePool>,
}

#[cfg(feature = "native-sqlite")]
impl Default for SqlxExtractor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "native-sqlite")]
impl SqlxExtractor {
    pub fn new() -> Self {
        Self {
            pools: moka::future::Cache::builder().max_capacity(16).build(),
        }
    }

    async fn pool(&self, path: &Path) -> MbtilesResult<sqlx::SqlitePool> {
        use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

        // Keyed by mtime so a refreshed archive gets a fresh pool.
        let mtime = tokio::fs::metadata(path)
            .await?
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let options = SqliteConnectOptions::new()
            .filename(path)
            .read_only(true)
            .immutable(true);

        self.pools
            .try_get_with((path.to_path_buf(), mtime), async move {
                SqlitePoolOptions::new()
                    .max_connections(4)
                    .connect_with(options)
                    .await
            })
            .await
            .map_err(|e| MbtilesError::Unavailable(format!("sqlite open: {}", e)))
    }
}

#[cfg(feature = "native-sqlite")]
impl TileExtractor for SqlxExtractor {
    fn name(&self) -> &'static str {
        "sqlx"
    }

    fn extract<'a>(
        &'a self,
        path: &'a Path,
        coord: TileCoord,
    ) -> BoxFuture<'a, MbtilesResult<Option<Vec<u8>>>> {
        Box::pin(async move {
            let pool = self.pool(path).await?;
            sqlx::query_scalar::<_, Vec<u8>>(
                "SELECT tile_data FROM tiles \
                 WHERE zoom_level = ?1 AND tile_column = ?2 AND tile_row = ?3 LIMIT 1",
            )
            .bind(i64::from(coord.z))
            .bind(i64::from(coord.x))
            .bind(i64::from(coord.tms_row()))
            .fetch_optional(&pool)
            .await
            .map_err(|e| MbtilesError::ExtractionFailure(format!("sqlx: {}", e)))
        })
    }
}

// =============================================================================
// Command-line fallback
// =============================================================================

/// Extracts tiles by running the `sqlite3` command-line tool.
#[derive(Debug, Clone)]
pub struct CliExtractor {
    binary: PathBuf,
    workers: Arc<Semaphore>,
}

impl Default for CliExtractor {
    fn default() -> Self {
        Self::new(DEFAULT_SQLITE_BINARY, DEFAULT_CLI_WORKERS)
    }
}

impl CliExtractor {
    pub fn new(binary: impl Into<PathBuf>, workers: usize) -> Self {
        Self {
            binary: binary.into(),
            workers: Arc::new(Semaphore::new(workers.max(1))),
        }
    }

    async fn run(&self, path: &Path, coord: TileCoord) -> MbtilesResult<Option<Vec<u8>>> {
        let _permit = self
            .workers
            .acquire()
            .await
            .map_err(|_| MbtilesError::Unavailable("worker pool closed".to_string()))?;

        trace!(binary = %self.binary.display(), path = %path.display(), tile = %coord, "sqlite3");
        let output = Command::new(&self.binary)
            .arg("-readonly")
            .arg(path)
            .arg(tile_query(coord, true))
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    MbtilesError::Unavailable(format!("{} not found", self.binary.display()))
                } else {
                    MbtilesError::ExtractionFailure(format!("spawn sqlite3: {}", e))
                }
            })?;

        if !output.status.success() {
            return Err(MbtilesError::ExtractionFailure(format!(
                "sqlite3 exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let text = String::from_utf8_lossy(&output.stdout);
        let text = text.trim();
        if text.is_empty() {
            return Ok(None);
        }
        hex::decode(text)
            .map(Some)
            .map_err(|e| MbtilesError::ExtractionFailure(format!("bad hex from sqlite3: {}", e)))
    }
}

impl TileExtractor for CliExtractor {
    fn name(&self) -> &'static str {
        "sqlite3-cli"
    }

    fn extract<'a>(
        &'a self,
        path: &'a Path,
        coord: TileCoord,
    ) -> BoxFuture<'a, MbtilesResult<Option<Vec<u8>>>> {
        Box::pin(async move {
            let result = self.run(path, coord).await;
            debug!(tile = %coord, ok = result.is_ok(), "CLI extraction finished");
            result
        })
    }
}

/// The default strategy chain for this build.
pub fn default_extractors(sqlite_binary: &str, cli_workers: usize) -> Vec<Arc<dyn TileExtractor>> {
    let mut extractors: Vec<Arc<dyn TileExtractor>> = Vec::new();
    #[cfg(feature = "native-sqlite")]
    extractors.push(Arc::new(SqlxExtractor::new()));
    extractors.push(Arc::new(CliExtractor::new(sqlite_binary, cli_workers)));
    extractors
}
