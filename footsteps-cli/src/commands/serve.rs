//! Serve command - run the origin proxy and SQLite tile service.

use std::net::SocketAddr;

use clap::Args;
use footsteps::app::{AppConfig, FootstepsContext};
use footsteps::config::ConfigFile;
use footsteps::server::{cancel_on_ctrl_c, router, serve};
use tokio::net::TcpListener;
use tracing::warn;

use crate::error::CliError;

/// Arguments for the serve command.
#[derive(Debug, Args)]
pub struct ServeArgs {
    /// Address to listen on (default from config)
    #[arg(long)]
    pub bind: Option<SocketAddr>,

    /// Upstream archive origin for /proxy
    #[arg(long)]
    pub upstream: Option<String>,

    /// Base URL or directory of SQLite archives for /tiles
    #[arg(long)]
    pub mbtiles: Option<String>,
}

/// Run the serve command.
pub async fn run(mut config: ConfigFile, args: ServeArgs) -> Result<(), CliError> {
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }
    if args.upstream.is_some() {
        config.server.upstream = args.upstream;
    }
    if args.mbtiles.is_some() {
        config.server.mbtiles_origin = args.mbtiles;
    }

    let context = FootstepsContext::new(AppConfig::from_config_file(&config))?;
    let state = context.server_state();

    println!("Footsteps Server v{}", footsteps::VERSION);
    println!("======================");
    println!();
    println!("Listening: http://{}", config.server.bind);
    match &state.proxy {
        Some(proxy) => println!("Proxy:     /proxy/* → {}", proxy.upstream()),
        None => println!("Proxy:     disabled"),
    }
    match &config.server.mbtiles_origin {
        Some(origin) => println!("Tiles:     /tiles/{{year}}/{{lod}}/{{z}}/{{x}}/{{y}} ← {}", origin),
        None => println!("Tiles:     disabled"),
    }
    println!();
    if state.proxy.is_none() && state.mbtiles.is_none() {
        warn!("Neither upstream nor mbtiles_origin is configured; only /healthz is served");
    }

    let listener = TcpListener::bind(config.server.bind)
        .await
        .map_err(|e| CliError::Bind {
            addr: config.server.bind.to_string(),
            reason: e.to_string(),
        })?;

    let shutdown = context.shutdown_token();
    cancel_on_ctrl_c(shutdown.clone());
    serve(listener, router(state), shutdown)
        .await
        .map_err(|e| CliError::Serve(e.to_string()))?;

    context.shutdown();
    Ok(())
}
