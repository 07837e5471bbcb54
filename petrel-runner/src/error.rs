//! Runner error types.

use petrel_core::NetError;
use std::path::PathBuf;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{}': {}", .0.display(), .1)]
    IoError(PathBuf, #[source] std::io::Error),

    #[error("failed to parse config file '{}': {}", .0.display(), .1)]
    ParseError(PathBuf, String),

    #[error("configuration validation failed: {0}")]
    ValidationError(String),
}

/// Runner errors.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("net error: {0}")]
    Net(#[from] NetError),

    #[error("failed to read net definition '{}': {}", .0.display(), .1)]
    Io(PathBuf, #[source] std::io::Error),
}

impl RunnerError {
    /// Returns a stable error code suitable for reports and logs.
    pub fn error_code(&self) -> &'static str {
        match self {
            RunnerError::Config(_) => "CONFIG",
            RunnerError::Net(e) => e.error_code(),
            RunnerError::Io(..) => "IO",
        }
    }
}
