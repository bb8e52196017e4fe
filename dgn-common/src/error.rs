//! Common error types for DGN

use thiserror::Error;

use crate::dates::DateParseError;

/// Common result type for DGN operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across the DGN crates
#[derive(Error, Debug)]
pub enum Error {
    /// Unparseable calendar date text
    #[error(transparent)]
    DateParse(#[from] DateParseError),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parameter file or points file could not be decoded
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML configuration file could not be decoded
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid caller input (e.g. inverted date range)
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
