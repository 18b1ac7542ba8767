//! folio-wire: Wire types and protocol events for the folio conversation engine
//!
//! This crate defines the data model shared between client and backend
//! (conversations, messages, retrieved sources) and the closed set of
//! protocol events exchanged over the streaming connection.

pub mod error;
pub mod events;
pub mod types;

pub use error::{Error, Result};
pub use events::{ClientEvent, ServerEvent};
pub use types::{Conversation, Message, MessageSource, Role, SourceRef};
