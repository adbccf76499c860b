//! Cache management CLI commands.

use clap::Subcommand;
use footsteps::app::{AppConfig, FootstepsContext};
use footsteps::config::{format_size, ConfigFile};
use footsteps::mbtiles::DownloadCache;

use crate::error::CliError;

/// Cache action subcommands.
#[derive(Debug, Subcommand)]
pub enum CacheAction {
    /// Remove every downloaded archive
    Clear,
    /// Show download cache statistics
    Stats,
}

/// Run a cache subcommand.
pub async fn run(config: &ConfigFile, action: CacheAction) -> Result<(), CliError> {
    let context = FootstepsContext::new(AppConfig::from_config_file(config))?;
    let cache = DownloadCache::new(config.cache.directory.clone(), context.client().clone());

    match action {
        CacheAction::Clear => {
            println!("Clearing download cache at: {}", cache.dir().display());
            let removed = cache.clear().await?;
            println!("Deleted {} archives", removed);
            Ok(())
        }
        CacheAction::Stats => {
            let entries = cache.entries().await?;
            let total: u64 = entries.iter().map(|e| e.size).sum();

            println!("Download cache: {}", cache.dir().display());
            println!("  Archives: {}", entries.len());
            println!("  Size:     {}", format_size(total));
            for entry in &entries {
                let label = match entry.archive {
                    Some(archive) => match archive.lod {
                        Some(lod) => format!("year {} lod {}", archive.year, lod.level()),
                        None => format!("year {}", archive.year),
                    },
                    None => "unrecognized".to_string(),
                };
                println!("    {:<48} {:>10}  {}", entry.file_name, format_size(entry.size), label);
            }
            Ok(())
        }
    }
}
