//! Error types for the CLI

use std::path::PathBuf;

/// CLI Result type
pub type Result<T> = std::result::Result<T, Error>;

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to read {path}: {message}")]
    ReadFile { path: PathBuf, message: String },

    #[error("plan failed: {0}")]
    Plan(#[from] tether_common::Error),

    #[error("logging setup failed: {0}")]
    Telemetry(#[from] tether_common::telemetry::TelemetryError),

    #[error("validation error: {message}")]
    Validation { message: String },
}

impl Error {
    pub fn validation(message: impl Into<String>) -> Self {
        Error::Validation {
            message: message.into(),
        }
    }

    pub fn read_file(path: impl Into<PathBuf>, err: impl std::fmt::Display) -> Self {
        Error::ReadFile {
            path: path.into(),
            message: err.to_string(),
        }
    }
}
