//! folio-client: Streaming conversation runtime
//!
//! This crate provides the client side of the folio streaming protocol:
//! a reconnecting websocket connection, the per-conversation session state
//! machine, the store reconciling streamed tokens with committed history,
//! and a thin client for the conversation CRUD collaborator API.

pub mod api;
pub mod connection;
pub mod error;
pub mod session;
pub mod store;

pub use api::{ConversationApi, ConversationWithMessages};
pub use connection::{Connection, ConnectionState, ReconnectConfig};
pub use error::{Error, Result};
pub use session::{ChatSession, SessionConfig, SessionPhase};
pub use store::{ConversationStore, LoadingStage};
