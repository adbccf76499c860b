//! Configuration CLI commands.

use clap::Subcommand;
use footsteps::config::{config_file_path, ConfigFile};

use crate::error::CliError;

/// Config subcommands.
#[derive(Debug, Clone, Subcommand)]
pub enum ConfigCommands {
    /// Print the effective configuration (file plus environment)
    Show,

    /// Write the effective configuration to the config file
    Init,

    /// Show the configuration file path
    Path,
}

/// Run a config subcommand.
pub fn run(config: &ConfigFile, command: ConfigCommands) -> Result<(), CliError> {
    match command {
        ConfigCommands::Show => {
            let mut out = Vec::new();
            config
                .to_ini()
                .write_to(&mut out)
                .map_err(|e| CliError::Config(e.to_string()))?;
            print!("{}", String::from_utf8_lossy(&out));
            Ok(())
        }
        ConfigCommands::Init => {
            let path = config_file_path();
            if path.exists() {
                return Err(CliError::Config(format!(
                    "{} already exists",
                    path.display()
                )));
            }
            config.save_to(&path)?;
            println!("Wrote {}", path.display());
            Ok(())
        }
        ConfigCommands::Path => {
            println!("{}", config_file_path().display());
            Ok(())
        }
    }
}
