//! Core data model for conversations, messages, and retrieved sources

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Prefix used for client-minted ids of unconfirmed user messages.
const PENDING_ID_PREFIX: &str = "pending-";

/// Who authored a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// A retrieved source chunk attached to an assistant message.
///
/// Immutable once produced by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageSource {
    /// Display name of the originating document
    pub name: String,
    /// Identifier of the originating document
    pub source_id: String,
    /// Extracted chunk text shown in citation tooltips
    pub chunk_text: String,
    /// Index of the chunk within its document
    pub chunk_index: u32,
    /// Similarity score in [0, 1]
    pub score: f64,
}

/// A single chat message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Server-assigned id, or a client-generated temporary id for
    /// unconfirmed user messages
    pub id: String,
    /// Conversation this message belongs to
    pub conversation_id: String,
    /// Author role
    pub role: Role,
    /// UTF-8 content; may contain citation markers `[n]` and math spans
    pub content: String,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Retrieved sources, only ever present on assistant messages
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<MessageSource>>,
}

impl Message {
    /// Create an optimistic user message with a client-minted temporary id.
    pub fn pending_user(conversation_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: format!("{}{}", PENDING_ID_PREFIX, uuid::Uuid::new_v4()),
            conversation_id: conversation_id.into(),
            role: Role::User,
            content: content.into(),
            created_at: Utc::now(),
            sources: None,
        }
    }

    /// Whether this message carries a client-minted temporary id.
    pub fn is_pending(&self) -> bool {
        self.id.starts_with(PENDING_ID_PREFIX)
    }
}

/// Denormalized name/type pair for a conversation's attached source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef {
    pub name: String,
    pub kind: String,
}

/// A conversation record, owned by the backend.
///
/// The client holds a cached copy keyed by id, replaced wholesale on
/// refetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub title: String,
    /// Ordered ids of the documents this conversation is grounded on
    pub source_ids: Vec<String>,
    /// Denormalized source names/types for display
    #[serde(default)]
    pub sources: Vec<SourceRef>,
}
