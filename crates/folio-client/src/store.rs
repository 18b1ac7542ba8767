//! Streaming reconciliation store
//!
//! Per-conversation state: committed message history, the in-flight
//! streaming buffer, and the loading-stage indicator. All mutation happens
//! inside one mutex, so finalization (commit message + clear buffer) is
//! atomic: no reader ever observes a generation with neither its buffer
//! nor its final message.

use std::collections::HashMap;

use chrono::Utc;
use parking_lot::Mutex;

use folio_wire::{Message, Role};

/// Loading-stage indicator shown while a generation has produced no
/// content yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadingStage {
    pub stage: String,
    pub message: String,
}

/// Accumulated partial content of one in-flight generation.
///
/// Created on `message_start`, destroyed exactly once: converted into a
/// committed message on finalize, or discarded on error.
#[derive(Debug, Default)]
struct StreamingState {
    /// Append-only within one generation
    content: String,
    /// Provisional message id, learned from the first token event
    message_id: Option<String>,
}

#[derive(Default)]
struct ConversationEntry {
    messages: Vec<Message>,
    streaming: Option<StreamingState>,
    loading_stage: Option<LoadingStage>,
}

/// Single source of truth for conversation state on the client.
///
/// UI reads go through the accessors here; protocol event handlers and the
/// optimistic-send path are the only writers.
#[derive(Default)]
pub struct ConversationStore {
    inner: Mutex<HashMap<String, ConversationEntry>>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Committed history, with one synthetic trailing assistant message
    /// appended while a generation has streamed non-empty content.
    /// Consumers see a single continuous ordered view.
    pub fn messages(&self, conversation_id: &str) -> Vec<Message> {
        let inner = self.inner.lock();
        let Some(entry) = inner.get(conversation_id) else {
            return Vec::new();
        };
        let mut messages = entry.messages.clone();
        if let Some(streaming) = &entry.streaming {
            if !streaming.content.is_empty() {
                messages.push(Message {
                    id: streaming
                        .message_id
                        .clone()
                        .unwrap_or_else(|| format!("streaming-{conversation_id}")),
                    conversation_id: conversation_id.to_string(),
                    role: Role::Assistant,
                    content: streaming.content.clone(),
                    created_at: Utc::now(),
                    sources: None,
                });
            }
        }
        messages
    }

    /// Replace a conversation's committed history (seed from the CRUD API).
    pub fn set_messages(&self, conversation_id: &str, messages: Vec<Message>) {
        let mut inner = self.inner.lock();
        inner.entry(conversation_id.to_string()).or_default().messages = messages;
    }

    /// Append a message to committed history. Idempotent: a message whose
    /// id is already present is a no-op, covering at-least-once redelivery.
    /// Returns whether the message was actually added.
    pub fn add_message(&self, message: Message) -> bool {
        let mut inner = self.inner.lock();
        let entry = inner.entry(message.conversation_id.clone()).or_default();
        if entry.messages.iter().any(|m| m.id == message.id) {
            return false;
        }
        entry.messages.push(message);
        true
    }

    /// Remove a message from committed history (optimistic-send rollback).
    pub fn remove_message(&self, conversation_id: &str, message_id: &str) -> bool {
        let mut inner = self.inner.lock();
        let Some(entry) = inner.get_mut(conversation_id) else {
            return false;
        };
        let before = entry.messages.len();
        entry.messages.retain(|m| m.id != message_id);
        entry.messages.len() != before
    }

    /// Open a StreamingState for a conversation. Returns `false` if one is
    /// already unresolved; at most one generation may be in flight per
    /// conversation.
    pub fn begin_streaming(&self, conversation_id: &str) -> bool {
        let mut inner = self.inner.lock();
        let entry = inner.entry(conversation_id.to_string()).or_default();
        if entry.streaming.is_some() {
            return false;
        }
        entry.streaming = Some(StreamingState::default());
        true
    }

    /// Append one token to the streaming buffer. A non-empty token also
    /// clears any lingering loading stage, covering races where the
    /// explicit stage-clear was never sent.
    pub fn append_token(&self, conversation_id: &str, message_id: &str, token: &str) {
        let mut inner = self.inner.lock();
        let Some(entry) = inner.get_mut(conversation_id) else {
            return;
        };
        let Some(streaming) = entry.streaming.as_mut() else {
            tracing::warn!(conversation_id, "token for conversation with no open generation");
            return;
        };
        streaming.content.push_str(token);
        if streaming.message_id.is_none() {
            streaming.message_id = Some(message_id.to_string());
        }
        if !token.is_empty() {
            entry.loading_stage = None;
        }
    }

    /// Set or clear the loading-stage indicator. An empty `message` is the
    /// stage-clear signal.
    pub fn set_loading_stage(&self, conversation_id: &str, stage: &str, message: &str) {
        let mut inner = self.inner.lock();
        let entry = inner.entry(conversation_id.to_string()).or_default();
        if message.is_empty() {
            entry.loading_stage = None;
        } else {
            entry.loading_stage = Some(LoadingStage {
                stage: stage.to_string(),
                message: message.to_string(),
            });
        }
    }

    /// Commit the server-supplied final message and clear the streaming
    /// state in one critical section. The token buffer is never the source
    /// of truth for the final content: the server message always wins.
    pub fn finalize(&self, conversation_id: &str, message: Message) {
        let mut inner = self.inner.lock();
        let entry = inner.entry(conversation_id.to_string()).or_default();
        entry.streaming = None;
        entry.loading_stage = None;
        if !entry.messages.iter().any(|m| m.id == message.id) {
            entry.messages.push(message);
        }
    }

    /// Discard an in-flight generation without producing a message.
    pub fn fail(&self, conversation_id: &str) {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.get_mut(conversation_id) {
            entry.streaming = None;
            entry.loading_stage = None;
        }
    }

    /// Purge a conversation entirely: history, streaming state, and
    /// loading indicator together.
    pub fn remove_conversation(&self, conversation_id: &str) {
        self.inner.lock().remove(conversation_id);
    }

    /// Current loading-stage indicator, if any.
    pub fn loading_stage(&self, conversation_id: &str) -> Option<LoadingStage> {
        self.inner
            .lock()
            .get(conversation_id)
            .and_then(|e| e.loading_stage.clone())
    }

    /// Accumulated streaming content, if a generation is in flight.
    pub fn streaming_content(&self, conversation_id: &str) -> Option<String> {
        self.inner
            .lock()
            .get(conversation_id)
            .and_then(|e| e.streaming.as_ref())
            .map(|s| s.content.clone())
    }

    /// Whether a generation is currently in flight.
    pub fn is_streaming(&self, conversation_id: &str) -> bool {
        self.inner
            .lock()
            .get(conversation_id)
            .is_some_and(|e| e.streaming.is_some())
    }
}
