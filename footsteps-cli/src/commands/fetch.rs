//! Fetch command - load one tile through the full client pipeline.

use clap::Args;
use footsteps::app::{AppConfig, FootstepsContext};
use footsteps::config::{format_size, ConfigFile};
use footsteps::coord::TileCoord;
use footsteps::decoder::Geometry;
use footsteps::lod::Lod;
use footsteps::pipeline::{LayerId, TileOutcome};
use tokio_util::sync::CancellationToken;

use crate::error::CliError;

/// Arguments for the fetch command.
#[derive(Debug, Args)]
pub struct FetchArgs {
    /// Timeline year (negative for BCE)
    #[arg(long, allow_hyphen_values = true)]
    pub year: i32,

    #[arg(long)]
    pub zoom: u8,

    #[arg(long)]
    pub x: u32,

    #[arg(long)]
    pub y: u32,

    /// Level of detail (default: selected from the zoom)
    #[arg(long)]
    pub lod: Option<u8>,

    /// Archive origin, URL or directory (default from config)
    #[arg(long)]
    pub origin: Option<String>,
}

/// Run the fetch command.
pub async fn run(config: ConfigFile, args: FetchArgs) -> Result<(), CliError> {
    let coord = TileCoord::new(args.zoom, args.x, args.y)
        .map_err(|e| CliError::InvalidTile(e.to_string()))?;

    let mut app_config = AppConfig::from_config_file(&config);
    if let Some(origin) = args.origin {
        app_config.origin = origin;
    }
    let context = FootstepsContext::new(app_config)?;

    let lod = match args.lod {
        Some(level) => Lod::new(level)
            .ok_or_else(|| CliError::InvalidTile(format!("unknown lod {}", level)))?,
        None => context.select_lod(f64::from(args.zoom)),
    };
    let layer = LayerId::new(args.year, lod);

    println!("Origin: {}", context.config().origin);
    println!("Layer:  {} ({})", layer, lod.name());
    println!("Tile:   {}", coord);
    println!();

    let outcome = context
        .loader()
        .load_tile(layer, coord, &CancellationToken::new())
        .await;

    match &outcome {
        TileOutcome::Loaded(features) => {
            let (mut points, mut lines, mut polygons) = (0, 0, 0);
            for feature in &features.features {
                match feature.geometry {
                    Geometry::Points(_) => points += 1,
                    Geometry::Lines(_) => lines += 1,
                    Geometry::Polygons(_) => polygons += 1,
                }
            }
            println!("Layer {}: {} features", features.layer, features.len());
            println!("  Points:   {}", points);
            println!("  Lines:    {}", lines);
            println!("  Polygons: {}", polygons);
        }
        TileOutcome::Empty => println!("No data at this tile"),
        TileOutcome::Aborted => println!("Fetch cancelled"),
        TileOutcome::Unavailable(e) => {
            return Err(CliError::Fetch(format!("{} is unavailable: {}", layer, e)));
        }
    }

    let stats = context.cache().stats();
    println!();
    println!("Feature cache:");
    println!("  Tiles:  {}", stats.tile_count);
    println!("  Size:   {}", format_size(stats.total_bytes as u64));
    println!("  Hits:   {}", stats.hits);
    println!("  Misses: {}", stats.misses);

    context.shutdown();
    Ok(())
}
