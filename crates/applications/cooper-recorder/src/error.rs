//! Error types for the recorder application

use std::path::PathBuf;

use cooper_core::RecorderError;
use thiserror::Error;

/// Application result type
pub type Result<T> = std::result::Result<T, AppError>;

/// Errors that can occur while loading input or writing output
#[derive(Error, Debug)]
pub enum AppError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML config parse error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// SQLite error outside an export (opening, schema setup, queries)
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Error from the recording session
    #[error("Recorder error: {0}")]
    Recorder(#[from] RecorderError),

    /// A trace file could not be used
    #[error("Invalid trace {path}: {reason}")]
    InvalidTrace { path: PathBuf, reason: String },

    /// Synthetic run parameters out of range
    #[error("Invalid synthetic configuration: {0}")]
    InvalidSynthetic(String),
}

impl AppError {
    /// Create an invalid trace error
    pub fn invalid_trace(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::InvalidTrace {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid synthetic configuration error
    pub fn invalid_synthetic(msg: impl Into<String>) -> Self {
        Self::InvalidSynthetic(msg.into())
    }
}
