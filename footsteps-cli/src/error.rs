//! CLI error type.

use thiserror::Error;

use footsteps::app::AppError;
use footsteps::config::ConfigError;
use footsteps::logging::LoggingError;
use footsteps::mbtiles::MbtilesError;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    ConfigFile(#[from] ConfigError),

    #[error(transparent)]
    Logging(#[from] LoggingError),

    #[error(transparent)]
    App(#[from] AppError),

    #[error("Invalid tile: {0}")]
    InvalidTile(String),

    #[error("Tile fetch failed: {0}")]
    Fetch(String),

    #[error("Cache operation failed: {0}")]
    Cache(#[from] MbtilesError),

    #[error("Failed to bind {addr}: {reason}")]
    Bind { addr: String, reason: String },

    #[error("Server error: {0}")]
    Serve(String),
}

impl CliError {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Config(_) | CliError::ConfigFile(_) | CliError::InvalidTile(_) => 2,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(CliError::InvalidTile("z".into()).exit_code(), 2);
        assert_eq!(CliError::Fetch("timeout".into()).exit_code(), 1);
        assert_eq!(
            CliError::Cache(MbtilesError::NotFound("humans_1.mbtiles".into())).exit_code(),
            1
        );
    }
}
