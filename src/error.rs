//! Error types for DhruvaAMCL

use thiserror::Error;

/// DhruvaAMCL error type
#[derive(Error, Debug)]
pub enum AmclError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Map error: {0}")]
    Map(String),

    #[error("Filter error: {0}")]
    Filter(String),

    #[error("Store I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

impl From<toml::de::Error> for AmclError {
    fn from(e: toml::de::Error) -> Self {
        AmclError::Config(e.to_string())
    }
}

impl From<toml::ser::Error> for AmclError {
    fn from(e: toml::ser::Error) -> Self {
        AmclError::Config(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AmclError>;
