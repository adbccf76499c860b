//! HTTP surface: origin proxy and SQLite tile service.
//!
//! ```text
//! GET|HEAD /proxy/*path              → TileProxy     (optional)
//! GET      /tiles/:year/:lod/:z/:x/:y → MbtilesService (optional)
//! GET      /healthz                   → "ok"
//! ```
//!
//! Both services are stateless per request; the only shared state is the
//! download cache directory behind [`MbtilesService`].

mod error;
mod proxy;
mod tiles;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, RawQuery, State};
use axum::http::{HeaderMap, Method};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub use error::ServerError;
pub use proxy::{forwarded_headers, TileProxy, FORWARDED_HEADERS, IMMUTABLE_CACHE_CONTROL};
pub use tiles::{
    etag_matches, serve_tile, TilePath, TILE_CACHE_CONTROL, TILE_CONTENT_TYPE, X_CACHE_STATUS,
};

use crate::mbtiles::MbtilesService;

/// Services behind the router. Either may be absent.
#[derive(Debug, Clone, Default)]
pub struct ServerState {
    pub proxy: Option<TileProxy>,
    pub mbtiles: Option<Arc<MbtilesService>>,
}

impl ServerState {
    pub fn with_proxy(mut self, proxy: TileProxy) -> Self {
        self.proxy = Some(proxy);
        self
    }

    pub fn with_mbtiles(mut self, service: Arc<MbtilesService>) -> Self {
        self.mbtiles = Some(service);
        self
    }
}

/// Builds the router.
pub fn router(state: ServerState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/proxy/*path", get(proxy_handler).head(proxy_handler))
        .route("/tiles/:year/:lod/:z/:x/:y", get(tile_handler))
        .with_state(Arc::new(state))
}

async fn healthz() -> &'static str {
    "ok"
}

async fn proxy_handler(
    State(state): State<Arc<ServerState>>,
    method: Method,
    Path(path): Path<String>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> Result<Response, ServerError> {
    let proxy = state.proxy.as_ref().ok_or(ServerError::Disabled("proxy"))?;
    proxy
        .forward(method, &path, query.as_deref(), &headers)
        .await
}

async fn tile_handler(
    State(state): State<Arc<ServerState>>,
    Path(path): Path<TilePath>,
    headers: HeaderMap,
) -> Result<Response, ServerError> {
    let service = state
        .mbtiles
        .as_ref()
        .ok_or(ServerError::Disabled("tile service"))?;
    serve_tile(service, &path, &headers).await
}

/// Serves `router` on `listener` until `shutdown` fires.
pub async fn serve(
    listener: TcpListener,
    router: Router,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let addr: Option<SocketAddr> = listener.local_addr().ok();
    info!(addr = ?addr, "Serving");
    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    info!("Server stopped");
    Ok(())
}

/// Cancels `shutdown` on Ctrl-C.
pub fn cancel_on_ctrl_c(shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if result.is_ok() {
                    info!("Ctrl-C received, shutting down");
                }
                shutdown.cancel();
            }
            _ = shutdown.cancelled() => {}
        }
    })
}
