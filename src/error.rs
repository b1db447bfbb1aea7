//! Error types for the regime engine.

use thiserror::Error;

/// Main error type for the regime engine.
#[derive(Error, Debug)]
pub enum RegimeError {
    #[error("Data error: {0}")]
    DataError(String),

    #[error("CSV parsing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Date parsing error: {0}")]
    DateParseError(#[from] chrono::ParseError),

    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("No data loaded")]
    NoData,

    #[error("Insufficient data: need at least {required} observations, got {available}")]
    InsufficientData { required: usize, available: usize },

    #[error("Exposure ranking expects {expected} states, found {found}")]
    StateCountMismatch { expected: usize, found: usize },

    #[error("Model error: {0}")]
    ModelError(String),

    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Result type alias for regime engine operations.
pub type Result<T> = std::result::Result<T, RegimeError>;
