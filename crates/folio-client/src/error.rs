//! Error types for folio-client

use thiserror::Error;

/// Result type alias using folio-client Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the conversation runtime
#[derive(Error, Debug)]
pub enum Error {
    /// The connection is not established
    #[error("Not connected to the backend")]
    NotConnected,

    /// The conversation has not been joined
    #[error("Conversation not joined: {conversation_id}")]
    NotJoined { conversation_id: String },

    /// The connection was closed or gave up reconnecting
    #[error("Connection closed")]
    ConnectionClosed,

    /// Wire encoding/decoding failed
    #[error(transparent)]
    Wire(#[from] folio_wire::Error),

    /// HTTP request to the CRUD API failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// CRUD API returned an error response
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// The backend violated the session protocol
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A generation exceeded the configured timeout
    #[error("Generation timed out for conversation {conversation_id}")]
    GenerationTimeout { conversation_id: String },
}
