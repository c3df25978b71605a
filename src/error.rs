//! Error types for cube and surface operations

use thiserror::Error;

/// Main error type for cube storage and surface operations
#[derive(Error, Debug)]
pub enum CubeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unsupported cube format: {0}")]
    UnsupportedFormat(String),

    #[error("Invalid file format: {0}")]
    Format(String),

    #[error("Invalid dimensions: {0}")]
    InvalidDimensions(String),

    #[error("Out of bounds: {0}")]
    OutOfBounds(String),

    #[error("Metadata error: {0}")]
    Metadata(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid axis: {0}")]
    InvalidAxis(usize),

    #[error("Statistics not collected: {0}")]
    MissingStatistics(String),

    #[error("Decompression error: {0}")]
    Decompression(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

/// Specialized Result type for cube operations
pub type Result<T> = std::result::Result<T, CubeError>;

impl From<bincode::Error> for CubeError {
    fn from(err: bincode::Error) -> Self {
        CubeError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for CubeError {
    fn from(err: serde_json::Error) -> Self {
        CubeError::Serialization(err.to_string())
    }
}
