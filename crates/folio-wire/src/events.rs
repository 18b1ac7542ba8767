//! Protocol events exchanged over the streaming connection
//!
//! Events are JSON text frames tagged by `type`. The set is closed: the
//! session state machine matches each kind exhaustively.

use serde::{Deserialize, Serialize};

use crate::types::Message;

/// Events sent from client to backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Enter a conversation room
    JoinConversation { conversation_id: String },

    /// Leave a conversation room
    LeaveConversation { conversation_id: String },

    /// Submit a user message for generation
    SendMessage {
        conversation_id: String,
        message: String,
    },
}

impl ClientEvent {
    /// Encode as a JSON text frame.
    pub fn to_frame(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Events received from the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Acknowledgment that a join completed
    JoinedConversation { conversation_id: String },

    /// A generation started for this conversation
    MessageStart { conversation_id: String },

    /// Loading-stage update while no content has streamed yet.
    /// An empty `message` clears the indicator.
    LoadingStage {
        conversation_id: String,
        stage: String,
        message: String,
    },

    /// One incremental content token
    MessageToken {
        conversation_id: String,
        message_id: String,
        token: String,
    },

    /// Generation finished; `message` is the authoritative finalized
    /// message including resolved sources.
    MessageEnd {
        conversation_id: String,
        message_id: String,
        message: Message,
    },

    /// Generation or protocol error
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        conversation_id: Option<String>,
        message: String,
    },
}

impl ServerEvent {
    /// Decode from a JSON text frame.
    pub fn from_frame(frame: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(frame)?)
    }

    /// The conversation this event belongs to, if any.
    pub fn conversation_id(&self) -> Option<&str> {
        match self {
            ServerEvent::JoinedConversation { conversation_id }
            | ServerEvent::MessageStart { conversation_id }
            | ServerEvent::LoadingStage {
                conversation_id, ..
            }
            | ServerEvent::MessageToken {
                conversation_id, ..
            }
            | ServerEvent::MessageEnd {
                conversation_id, ..
            } => Some(conversation_id),
            ServerEvent::Error {
                conversation_id, ..
            } => conversation_id.as_deref(),
        }
    }

    /// Check if this event ends an in-flight generation
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ServerEvent::MessageEnd { .. } | ServerEvent::Error { .. }
        )
    }
}
