//! Application error types.

use thiserror::Error;

use crate::config::ConfigError;

/// Errors that can occur while assembling the application.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    ConfigFile(#[from] ConfigError),

    #[error("Failed to build HTTP client: {0}")]
    HttpClient(String),

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Server error: {0}")]
    Serve(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_error_display() {
        let err = AppError::Config("no services enabled".to_string());
        assert!(err.to_string().contains("Configuration error"));
        assert!(err.to_string().contains("no services enabled"));
    }

    #[test]
    fn test_app_error_from_config_error() {
        let err: AppError = ConfigError::Parse("line 3".to_string()).into();
        assert!(matches!(err, AppError::ConfigFile(_)));
    }
}
