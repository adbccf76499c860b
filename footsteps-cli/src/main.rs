//! Footsteps CLI - command-line interface
//!
//! Runs the origin proxy and SQLite tile service, and exposes diagnostic
//! commands over the client pipeline.

mod commands;
mod error;

use clap::{Parser, Subcommand};
use footsteps::config::ConfigFile;
use footsteps::logging::init_logging;

use commands::cache::CacheAction;
use commands::config::ConfigCommands;
use commands::fetch::FetchArgs;
use commands::serve::ServeArgs;
use error::CliError;

#[derive(Debug, Parser)]
#[command(name = "footsteps", version, about = "Historical settlement tile services")]
struct Cli {
    /// Log level, overridden by RUST_LOG
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the origin proxy and SQLite tile service
    Serve(ServeArgs),

    /// Fetch and decode one tile through the client pipeline
    Fetch(FetchArgs),

    /// Print the level of detail for a zoom
    Lod {
        /// Map zoom (fractional zooms allowed)
        #[arg(allow_hyphen_values = true)]
        zoom: f64,
    },

    /// Inspect or clear the SQLite archive download cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Show the effective configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let mut config = ConfigFile::load()?;
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    let _guard = init_logging(&config.logging)?;

    match cli.command {
        Commands::Serve(args) => commands::serve::run(config, args).await,
        Commands::Fetch(args) => commands::fetch::run(config, args).await,
        Commands::Lod { zoom } => commands::lod::run(zoom),
        Commands::Cache { action } => commands::cache::run(&config, action).await,
        Commands::Config { command } => {
            commands::config::run(&config, command.unwrap_or(ConfigCommands::Show))
        }
    }
}
