//! Error types for folio-wire

use thiserror::Error;

/// Result type alias using folio-wire Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when encoding or decoding wire events
#[derive(Error, Debug)]
pub enum Error {
    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The frame was not valid UTF-8 text
    #[error("Invalid frame encoding: {0}")]
    Encoding(String),
}
