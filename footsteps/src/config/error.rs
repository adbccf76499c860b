//! Configuration errors.

use thiserror::Error;

/// Errors raised while loading or saving the configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(String),

    #[error("Invalid value '{value}' for {key}: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    pub(crate) fn invalid(key: &str, value: &str, reason: impl ToString) -> Self {
        ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl From<ini::Error> for ConfigError {
    fn from(e: ini::Error) -> Self {
        match e {
            ini::Error::Io(io) => ConfigError::Io(io),
            ini::Error::Parse(parse) => ConfigError::Parse(parse.to_string()),
        }
    }
}
