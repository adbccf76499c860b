//! Download cache freshness and the SQLite tile route.

mod common;

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::extract::State;
use axum::http::header::{
    CACHE_CONTROL, CONTENT_ENCODING, CONTENT_TYPE, ETAG, IF_NONE_MATCH, LAST_MODIFIED,
};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use filetime::FileTime;
use footsteps::coord::TileCoord;
use footsteps::lod::Lod;
use footsteps::mbtiles::{
    format_http_date, CacheStatus, CliExtractor, DownloadCache, MbtilesError, MbtilesOrigin,
    MbtilesResult, MbtilesService, TileExtractor, TEMP_PREFIX,
};
use footsteps::server::{router, ServerState, IMMUTABLE_CACHE_CONTROL, TILE_CONTENT_TYPE};
use futures::future::BoxFuture;
use reqwest::Client;

/// Origin modification time reported by the mock.
fn origin_modified() -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(1_600_000_000)
}

#[derive(Default)]
struct Origin {
    gets: AtomicUsize,
    heads: AtomicUsize,
    missing: AtomicUsize,
}

async fn archive(State(origin): State<Arc<Origin>>, method: axum::http::Method) -> impl IntoResponse {
    if method == axum::http::Method::GET {
        origin.gets.fetch_add(1, Ordering::SeqCst);
    } else if method == axum::http::Method::HEAD {
        origin.heads.fetch_add(1, Ordering::SeqCst);
    }
    (
        [(LAST_MODIFIED, format_http_date(origin_modified()))],
        b"sqlite archive bytes".to_vec(),
    )
}

async fn not_found(State(origin): State<Arc<Origin>>) -> StatusCode {
    origin.missing.fetch_add(1, Ordering::SeqCst);
    StatusCode::NOT_FOUND
}

async fn spawn_origin() -> (String, Arc<Origin>) {
    spawn_origin_serving(&["humans_1500.mbtiles"]).await
}

async fn spawn_origin_serving(names: &[&str]) -> (String, Arc<Origin>) {
    let origin = Arc::new(Origin::default());
    let app = names
        .iter()
        .fold(Router::new(), |app, name| {
            app.route(&format!("/mb/{}", name), get(archive))
        })
        .fallback(not_found)
        .with_state(Arc::clone(&origin));
    let addr = common::spawn_server(app).await;
    (format!("http://{}/mb", addr), origin)
}

fn temp_files(dir: &Path) -> usize {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(Result::ok)
                .filter(|e| e.file_name().to_string_lossy().starts_with(TEMP_PREFIX))
                .count()
        })
        .unwrap_or(0)
}

#[tokio::test]
async fn test_download_cache_miss_hit_refresh() {
    let (base, origin) = spawn_origin().await;
    let dir = tempfile::tempdir().unwrap();
    let cache = DownloadCache::new(dir.path(), Client::new()).with_freshness_window(Duration::ZERO);
    let url = format!("{}/humans_1500.mbtiles", base);

    let first = cache.fetch(&url).await.unwrap();
    assert_eq!(first.status, CacheStatus::Miss);
    assert_eq!(std::fs::read(&first.path).unwrap(), b"sqlite archive bytes");
    assert_eq!(origin.gets.load(Ordering::SeqCst), 1);

    // Local copy is newer than the origin.
    let second = cache.fetch(&url).await.unwrap();
    assert_eq!(second.status, CacheStatus::Hit);
    assert_eq!(second.path, first.path);
    assert_eq!(origin.gets.load(Ordering::SeqCst), 1);

    // Local copy predates the origin.
    let stale = FileTime::from_system_time(origin_modified() - Duration::from_secs(86_400));
    filetime::set_file_mtime(&first.path, stale).unwrap();
    let third = cache.fetch(&url).await.unwrap();
    assert_eq!(third.status, CacheStatus::Refresh);
    assert_eq!(origin.gets.load(Ordering::SeqCst), 2);
    assert!(third.modified > origin_modified());

    assert_eq!(temp_files(dir.path()), 0);
}

#[tokio::test]
async fn test_download_cache_skips_origin_check_within_freshness_window() {
    let (base, origin) = spawn_origin().await;
    let dir = tempfile::tempdir().unwrap();
    let cache = DownloadCache::new(dir.path(), Client::new());
    let url = format!("{}/humans_1500.mbtiles", base);

    let first = cache.fetch(&url).await.unwrap();
    assert_eq!(first.status, CacheStatus::Miss);
    assert_eq!(origin.heads.load(Ordering::SeqCst), 1);

    // Even a copy that looks stale is trusted until the window closes.
    let stale = FileTime::from_system_time(origin_modified() - Duration::from_secs(86_400));
    filetime::set_file_mtime(&first.path, stale).unwrap();
    for _ in 0..3 {
        let again = cache.fetch(&url).await.unwrap();
        assert_eq!(again.status, CacheStatus::Hit);
    }
    assert_eq!(origin.heads.load(Ordering::SeqCst), 1);
    assert_eq!(origin.gets.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_remote_service_checks_missing_combined_archive_once() {
    let (base, origin) = spawn_origin_serving(&["humans_1500_lod_2.mbtiles"]).await;
    let dir = tempfile::tempdir().unwrap();
    let service = MbtilesService::new(
        MbtilesOrigin::Remote(base),
        Arc::new(DownloadCache::new(dir.path(), Client::new())),
        vec![Arc::new(FixedExtractor)],
    );

    for _ in 0..3 {
        let tile = service
            .get_tile(1500, Lod::LOCAL, TileCoord { z: 5, x: 3, y: 10 })
            .await
            .unwrap();
        assert!(tile.gzip);
    }
    assert_eq!(origin.missing.load(Ordering::SeqCst), 1);
    assert_eq!(origin.heads.load(Ordering::SeqCst), 1);
    assert_eq!(origin.gets.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_download_cache_missing_archive() {
    let (base, _origin) = spawn_origin().await;
    let dir = tempfile::tempdir().unwrap();
    let cache = DownloadCache::new(dir.path(), Client::new());

    let err = cache
        .fetch(&format!("{}/humans_1.mbtiles", base))
        .await
        .unwrap_err();
    assert!(err.is_not_found());
    assert!(cache.entries().await.unwrap().is_empty());
    assert_eq!(temp_files(dir.path()), 0);
}

#[tokio::test]
async fn test_unreachable_origin_without_copy_is_download_failure() {
    let dir = tempfile::tempdir().unwrap();
    let cache = DownloadCache::new(dir.path(), Client::new());
    let err = cache
        .fetch("http://127.0.0.1:9/humans_1500.mbtiles")
        .await
        .unwrap_err();
    assert!(matches!(err, MbtilesError::DownloadFailure(_)));
}

/// Returns a fixed gzip payload for one coordinate.
struct FixedExtractor;

impl TileExtractor for FixedExtractor {
    fn name(&self) -> &'static str {
        "fixed"
    }

    fn extract<'a>(
        &'a self,
        _path: &'a Path,
        coord: TileCoord,
    ) -> BoxFuture<'a, MbtilesResult<Option<Vec<u8>>>> {
        Box::pin(async move {
            Ok((coord == TileCoord { z: 5, x: 3, y: 10 }).then(|| vec![0x1f, 0x8b, 8, 0, 1, 2]))
        })
    }
}

async fn spawn_tile_server(origin: MbtilesOrigin, cache_dir: &Path) -> String {
    let service = MbtilesService::new(
        origin,
        Arc::new(DownloadCache::new(cache_dir, Client::new())),
        vec![Arc::new(FixedExtractor)],
    );
    let state = ServerState::default().with_mbtiles(Arc::new(service));
    format!("http://{}", common::spawn_server(router(state)).await)
}

#[tokio::test]
async fn test_tile_route_headers_and_revalidation() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("humans_1500.mbtiles"), b"db").unwrap();
    let base = spawn_tile_server(MbtilesOrigin::Local(dir.path().to_path_buf()), dir.path()).await;
    let client = Client::new();

    let response = client
        .get(format!("{}/tiles/1500/2/5/3/10.pbf", base))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get(CONTENT_TYPE).unwrap(), TILE_CONTENT_TYPE);
    assert_eq!(response.headers().get(CONTENT_ENCODING).unwrap(), "gzip");
    assert_eq!(response.headers().get(CACHE_CONTROL).unwrap(), IMMUTABLE_CACHE_CONTROL);
    assert!(response.headers().get("x-cache-status").is_none());
    let etag = response.headers().get(ETAG).unwrap().clone();
    assert!(etag.to_str().unwrap().ends_with("-2-5-3-10\""));
    assert_eq!(&response.bytes().await.unwrap()[..], &[0x1f, 0x8b, 8, 0, 1, 2]);

    let revalidated = client
        .get(format!("{}/tiles/1500/2/5/3/10.pbf", base))
        .header(IF_NONE_MATCH, etag.clone())
        .send()
        .await
        .unwrap();
    assert_eq!(revalidated.status(), StatusCode::NOT_MODIFIED);
    assert_eq!(revalidated.headers().get(ETAG).unwrap(), &etag);

    let missing = client
        .get(format!("{}/tiles/1500/2/5/3/11", base))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);

    let no_year = client
        .get(format!("{}/tiles/1800/2/5/3/10", base))
        .send()
        .await
        .unwrap();
    assert_eq!(no_year.status(), StatusCode::NOT_FOUND);

    let bad_lod = client
        .get(format!("{}/tiles/1500/9/5/3/10", base))
        .send()
        .await
        .unwrap();
    assert_eq!(bad_lod.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_tile_route_reports_cache_status() {
    let (origin_base, _origin) = spawn_origin().await;
    let cache_dir = tempfile::tempdir().unwrap();
    let base = spawn_tile_server(MbtilesOrigin::Remote(origin_base), cache_dir.path()).await;
    let client = Client::new();
    let url = format!("{}/tiles/1500/0/5/3/10", base);

    let first = client.get(&url).send().await.unwrap();
    assert_eq!(first.headers().get("x-cache-status").unwrap(), "miss");
    let second = client.get(&url).send().await.unwrap();
    assert_eq!(second.headers().get("x-cache-status").unwrap(), "hit");
}

fn sqlite3_available() -> bool {
    std::process::Command::new("sqlite3")
        .arg("-version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

#[tokio::test]
async fn test_cli_extractor_reads_flipped_row() {
    if !sqlite3_available() {
        eprintln!("sqlite3 not installed, skipping");
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("humans_1500.mbtiles");
    let status = std::process::Command::new("sqlite3")
        .arg(&db)
        .arg(
            "CREATE TABLE tiles (zoom_level INTEGER, tile_column INTEGER, tile_row INTEGER, tile_data BLOB); \
             INSERT INTO tiles VALUES (5, 3, 21, X'1f8b0800ff00');",
        )
        .status()
        .unwrap();
    assert!(status.success());

    let extractor = CliExtractor::new("sqlite3", 2);
    let found = extractor
        .extract(&db, TileCoord { z: 5, x: 3, y: 10 })
        .await
        .unwrap();
    assert_eq!(found, Some(vec![0x1f, 0x8b, 0x08, 0x00, 0xff, 0x00]));

    let absent = extractor
        .extract(&db, TileCoord { z: 5, x: 3, y: 21 })
        .await
        .unwrap();
    assert_eq!(absent, None);

    let service = MbtilesService::new(
        MbtilesOrigin::Local(dir.path().to_path_buf()),
        Arc::new(DownloadCache::new(dir.path().join("cache"), Client::new())),
        vec![Arc::new(extractor)],
    );
    let tile = service
        .get_tile(1500, Lod::LOCAL, TileCoord { z: 5, x: 3, y: 10 })
        .await
        .unwrap();
    assert!(tile.gzip);
}

#[cfg(feature = "native-sqlite")]
#[tokio::test]
async fn test_sqlx_extractor_reads_flipped_row() {
    use footsteps::mbtiles::SqlxExtractor;
    use sqlx::sqlite::SqliteConnectOptions;
    use sqlx::{ConnectOptions, Connection};

    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("humans_1500_lod_1.mbtiles");
    let mut conn = SqliteConnectOptions::new()
        .filename(&db)
        .create_if_missing(true)
        .connect()
        .await
        .unwrap();
    sqlx::query(
        "CREATE TABLE tiles (zoom_level INTEGER, tile_column INTEGER, tile_row INTEGER, tile_data BLOB)",
    )
    .execute(&mut conn)
    .await
    .unwrap();
    sqlx::query("INSERT INTO tiles VALUES (?1, ?2, ?3, ?4)")
        .bind(5i64)
        .bind(3i64)
        .bind(21i64)
        .bind(vec![9u8, 8, 7])
        .execute(&mut conn)
        .await
        .unwrap();
    conn.close().await.unwrap();

    let extractor = SqlxExtractor::new();
    let found = extractor
        .extract(&db, TileCoord { z: 5, x: 3, y: 10 })
        .await
        .unwrap();
    assert_eq!(found, Some(vec![9, 8, 7]));

    // Combined archive absent: the per-LOD archive answers.
    let service = MbtilesService::new(
        MbtilesOrigin::Local(dir.path().to_path_buf()),
        Arc::new(DownloadCache::new(dir.path().join("cache"), Client::new())),
        vec![Arc::new(extractor)],
    );
    let tile = service
        .get_tile(1500, Lod::SUBREGIONAL, TileCoord { z: 5, x: 3, y: 10 })
        .await
        .unwrap();
    assert!(!tile.gzip);
    assert_eq!(&tile.data[..], &[9, 8, 7]);
}
