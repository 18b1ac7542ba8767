//! Conversation session protocol
//!
//! Drives the per-conversation generation lifecycle from the connection's
//! inbound event stream:
//!
//! `Idle → Joining → Joined → Generating{stage} → Streaming → Joined`
//!
//! Each event is handled to completion before the next one is read, so
//! events for a single conversation apply in receipt order and the store's
//! one-StreamingState-per-conversation invariant holds without extra
//! synchronization. Conversations never affect each other's state.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use folio_wire::{ClientEvent, Message, ServerEvent};

use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::store::ConversationStore;

/// Stage label set when a generation starts, before the backend reports
/// anything more specific.
const INITIAL_STAGE: &str = "initial";
const INITIAL_STAGE_MESSAGE: &str = "Thinking";

/// Session configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Maximum duration of one generation. A generation that reaches
    /// neither `message_end` nor `error` within this window is failed
    /// locally so the loading indicator cannot spin forever.
    pub generation_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            generation_timeout: Duration::from_secs(120),
        }
    }
}

/// Per-conversation protocol phase
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionPhase {
    /// No join issued
    Idle,
    /// Join sent, acknowledgment pending
    Joining,
    /// Usable; no generation in flight
    Joined,
    /// Generation started, no content streamed yet
    Generating { stage: String },
    /// Tokens are flowing
    Streaming,
}

struct SessionInner {
    store: Arc<ConversationStore>,
    phases: Mutex<HashMap<String, SessionPhase>>,
    /// Cancellation guards for armed generation timeouts, by conversation
    generation_guards: Mutex<HashMap<String, CancellationToken>>,
    /// Post-handling event fan-out for UI observers
    events_tx: broadcast::Sender<ServerEvent>,
    config: SessionConfig,
}

/// A chat session over one shared connection, multiplexing any number of
/// conversation rooms.
pub struct ChatSession {
    connection: Connection,
    inner: Arc<SessionInner>,
    pump_cancel: CancellationToken,
}

impl ChatSession {
    /// Attach a session to a connection and start the event pump.
    pub fn new(connection: Connection, store: Arc<ConversationStore>, config: SessionConfig) -> Self {
        let (events_tx, _) = broadcast::channel(256);
        let inner = Arc::new(SessionInner {
            store,
            phases: Mutex::new(HashMap::new()),
            generation_guards: Mutex::new(HashMap::new()),
            events_tx,
            config,
        });

        let pump_cancel = CancellationToken::new();
        let mut events = connection.subscribe();
        let pump_inner = Arc::clone(&inner);
        let cancel = pump_cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    received = events.recv() => match received {
                        Ok(event) => pump_inner.handle_event(event),
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "session pump lagged behind the connection");
                        }
                        Err(broadcast::error::RecvError::Closed) => return,
                    },
                }
            }
        });

        Self {
            connection,
            inner,
            pump_cancel,
        }
    }

    /// The underlying connection.
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// The reconciliation store backing this session.
    pub fn store(&self) -> &Arc<ConversationStore> {
        &self.inner.store
    }

    /// Subscribe to protocol events after the session has applied them.
    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.inner.events_tx.subscribe()
    }

    /// Current phase for a conversation.
    pub fn phase(&self, conversation_id: &str) -> SessionPhase {
        self.inner
            .phases
            .lock()
            .get(conversation_id)
            .cloned()
            .unwrap_or(SessionPhase::Idle)
    }

    /// Enter a conversation room. Fire-and-forget: the `joined_conversation`
    /// acknowledgment is observable but nothing blocks on it.
    pub fn join(&self, conversation_id: &str) -> Result<()> {
        self.inner
            .phases
            .lock()
            .insert(conversation_id.to_string(), SessionPhase::Joining);
        self.connection
            .send(ClientEvent::JoinConversation {
                conversation_id: conversation_id.to_string(),
            })
            .inspect_err(|_| {
                self.inner.phases.lock().remove(conversation_id);
            })
    }

    /// Leave a conversation room. Any unresolved generation for it is
    /// treated as stale and discarded; after a rejoin, committed history
    /// comes from the CRUD API, not from a buffer we stopped observing.
    pub fn leave(&self, conversation_id: &str) -> Result<()> {
        self.inner.disarm_generation(conversation_id);
        self.inner.store.fail(conversation_id);
        self.inner.phases.lock().remove(conversation_id);
        self.connection.send(ClientEvent::LeaveConversation {
            conversation_id: conversation_id.to_string(),
        })
    }

    /// Send a user message.
    ///
    /// Rejected locally, with no network call, unless the connection is up
    /// and the conversation is in the `Joined` phase. On acceptance the
    /// message appears in the store immediately under a temporary id; if
    /// the outbound send fails it is rolled back. Returns the optimistic
    /// message.
    pub fn send_message(&self, conversation_id: &str, content: &str) -> Result<Message> {
        if !self.connection.is_connected() {
            return Err(Error::NotConnected);
        }
        if self.phase(conversation_id) != SessionPhase::Joined {
            return Err(Error::NotJoined {
                conversation_id: conversation_id.to_string(),
            });
        }

        let optimistic = Message::pending_user(conversation_id, content);
        self.inner.store.add_message(optimistic.clone());

        let sent = self.connection.send(ClientEvent::SendMessage {
            conversation_id: conversation_id.to_string(),
            message: content.to_string(),
        });
        if let Err(e) = sent {
            self.inner.store.remove_message(conversation_id, &optimistic.id);
            return Err(e);
        }
        Ok(optimistic)
    }

    /// Detach the pump and close the connection.
    pub fn close(&self) {
        self.pump_cancel.cancel();
        self.connection.close();
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        self.pump_cancel.cancel();
    }
}

impl SessionInner {
    /// Apply one inbound event. Runs synchronously to completion; the pump
    /// reads the next event only after this returns.
    fn handle_event(self: &Arc<Self>, event: ServerEvent) {
        match &event {
            ServerEvent::JoinedConversation { conversation_id } => {
                tracing::debug!(conversation_id, "join acknowledged");
                self.phases
                    .lock()
                    .insert(conversation_id.clone(), SessionPhase::Joined);
            }
            ServerEvent::MessageStart { conversation_id } => {
                if !self.store.begin_streaming(conversation_id) {
                    tracing::warn!(
                        conversation_id,
                        "overlapping message_start for unresolved generation, dropping"
                    );
                    return;
                }
                self.store
                    .set_loading_stage(conversation_id, INITIAL_STAGE, INITIAL_STAGE_MESSAGE);
                self.phases.lock().insert(
                    conversation_id.clone(),
                    SessionPhase::Generating {
                        stage: INITIAL_STAGE.to_string(),
                    },
                );
                self.arm_generation_timeout(conversation_id);
            }
            ServerEvent::LoadingStage {
                conversation_id,
                stage,
                message,
            } => {
                self.store.set_loading_stage(conversation_id, stage, message);
                let mut phases = self.phases.lock();
                if let Some(phase) = phases.get_mut(conversation_id) {
                    if matches!(phase, SessionPhase::Generating { .. } | SessionPhase::Streaming) {
                        // An empty stage message means generation moved from
                        // thinking to producing output.
                        *phase = if message.is_empty() {
                            SessionPhase::Streaming
                        } else {
                            SessionPhase::Generating {
                                stage: stage.clone(),
                            }
                        };
                    }
                }
            }
            ServerEvent::MessageToken {
                conversation_id,
                message_id,
                token,
            } => {
                self.store.append_token(conversation_id, message_id, token);
                if !token.is_empty() {
                    let mut phases = self.phases.lock();
                    if matches!(
                        phases.get(conversation_id),
                        Some(SessionPhase::Generating { .. })
                    ) {
                        phases.insert(conversation_id.clone(), SessionPhase::Streaming);
                    }
                }
            }
            ServerEvent::MessageEnd {
                conversation_id,
                message,
                ..
            } => {
                self.disarm_generation(conversation_id);
                self.store.finalize(conversation_id, message.clone());
                self.phases
                    .lock()
                    .insert(conversation_id.clone(), SessionPhase::Joined);
            }
            ServerEvent::Error {
                conversation_id: Some(conversation_id),
                message,
            } => {
                tracing::warn!(conversation_id, error = %message, "generation failed");
                self.disarm_generation(conversation_id);
                self.store.fail(conversation_id);
                let mut phases = self.phases.lock();
                if phases.contains_key(conversation_id) {
                    phases.insert(conversation_id.clone(), SessionPhase::Joined);
                }
            }
            ServerEvent::Error {
                conversation_id: None,
                message,
            } => {
                // Connection-scoped error; nothing conversation-local to
                // unwind, observers decide what to surface.
                tracing::warn!(error = %message, "backend error");
            }
        }

        let _ = self.events_tx.send(event);
    }

    /// Arm the generation deadline for a conversation. On expiry a local
    /// protocol error is synthesized through the normal error path.
    fn arm_generation_timeout(self: &Arc<Self>, conversation_id: &str) {
        let guard = CancellationToken::new();
        if let Some(previous) = self
            .generation_guards
            .lock()
            .insert(conversation_id.to_string(), guard.clone())
        {
            previous.cancel();
        }

        let inner = Arc::clone(self);
        let conversation_id = conversation_id.to_string();
        let timeout = self.config.generation_timeout;
        tokio::spawn(async move {
            tokio::select! {
                _ = guard.cancelled() => {}
                _ = tokio::time::sleep(timeout) => {
                    tracing::warn!(
                        conversation_id = %conversation_id,
                        ?timeout,
                        "generation deadline passed without message_end"
                    );
                    let error = Error::GenerationTimeout {
                        conversation_id: conversation_id.clone(),
                    };
                    inner.handle_event(ServerEvent::Error {
                        conversation_id: Some(conversation_id),
                        message: error.to_string(),
                    });
                }
            }
        });
    }

    fn disarm_generation(&self, conversation_id: &str) {
        if let Some(guard) = self.generation_guards.lock().remove(conversation_id) {
            guard.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{ConnectionState, ReconnectConfig};
    use chrono::Utc;
    use folio_wire::Role;
    use futures::{SinkExt, StreamExt};
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::Message as WsMessage;

    fn final_message(conversation_id: &str, id: &str, content: &str) -> Message {
        Message {
            id: id.into(),
            conversation_id: conversation_id.into(),
            role: Role::Assistant,
            content: content.into(),
            created_at: Utc::now(),
            sources: None,
        }
    }

    /// Spawn a one-connection websocket backend that acknowledges joins and
    /// replies to each send_message with the scripted generation events.
    async fn scripted_backend(generation: Vec<ServerEvent>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

            while let Some(Ok(frame)) = ws.next().await {
                let WsMessage::Text(text) = frame else { continue };
                let event: ClientEvent = serde_json::from_str(&text).unwrap();
                match event {
                    ClientEvent::JoinConversation { conversation_id } => {
                        let ack = ServerEvent::JoinedConversation { conversation_id };
                        let frame = serde_json::to_string(&ack).unwrap();
                        ws.send(WsMessage::Text(frame)).await.unwrap();
                    }
                    ClientEvent::SendMessage { .. } => {
                        for event in &generation {
                            let frame = serde_json::to_string(event).unwrap();
                            ws.send(WsMessage::Text(frame)).await.unwrap();
                        }
                    }
                    ClientEvent::LeaveConversation { .. } => {}
                }
            }
        });

        format!("ws://{addr}")
    }

    async fn connect_session(url: &str, config: SessionConfig) -> ChatSession {
        let connection = Connection::connect(url, ReconnectConfig::default());
        let mut state_rx = connection.state_changes();
        tokio::time::timeout(Duration::from_secs(5), async {
            while *state_rx.borrow() != ConnectionState::Connected {
                state_rx.changed().await.unwrap();
            }
        })
        .await
        .expect("connection should come up");
        ChatSession::new(connection, Arc::new(ConversationStore::new()), config)
    }

    async fn wait_for<F: FnMut(&ServerEvent) -> bool>(
        events: &mut broadcast::Receiver<ServerEvent>,
        mut predicate: F,
    ) {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let event = events.recv().await.unwrap();
                if predicate(&event) {
                    return;
                }
            }
        })
        .await
        .expect("expected event did not arrive");
    }

    #[tokio::test]
    async fn test_full_generation_flow() {
        let final_msg = final_message("c1", "m1", "The value is 4.");
        let url = scripted_backend(vec![
            ServerEvent::MessageStart {
                conversation_id: "c1".into(),
            },
            ServerEvent::LoadingStage {
                conversation_id: "c1".into(),
                stage: "retrieval".into(),
                message: "Searching documents".into(),
            },
            ServerEvent::LoadingStage {
                conversation_id: "c1".into(),
                stage: "retrieval".into(),
                message: String::new(),
            },
            ServerEvent::MessageToken {
                conversation_id: "c1".into(),
                message_id: "m1".into(),
                token: "The value".into(),
            },
            ServerEvent::MessageToken {
                conversation_id: "c1".into(),
                message_id: "m1".into(),
                token: " is 4.".into(),
            },
            ServerEvent::MessageEnd {
                conversation_id: "c1".into(),
                message_id: "m1".into(),
                message: final_msg.clone(),
            },
        ])
        .await;

        let session = connect_session(&url, SessionConfig::default()).await;
        let mut events = session.subscribe();

        session.join("c1").unwrap();
        wait_for(&mut events, |e| {
            matches!(e, ServerEvent::JoinedConversation { .. })
        })
        .await;
        assert_eq!(session.phase("c1"), SessionPhase::Joined);

        let optimistic = session.send_message("c1", "what is 2+2?").unwrap();
        assert!(optimistic.is_pending());

        wait_for(&mut events, |e| matches!(e, ServerEvent::MessageEnd { .. })).await;

        let messages = session.store().messages("c1");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].id, optimistic.id);
        assert_eq!(messages[1], final_msg);
        assert!(!session.store().is_streaming("c1"));
        assert!(session.store().loading_stage("c1").is_none());
        assert_eq!(session.phase("c1"), SessionPhase::Joined);

        session.close();
    }

    #[tokio::test]
    async fn test_error_discards_generation() {
        let url = scripted_backend(vec![
            ServerEvent::MessageStart {
                conversation_id: "c1".into(),
            },
            ServerEvent::MessageToken {
                conversation_id: "c1".into(),
                message_id: "m1".into(),
                token: "partial".into(),
            },
            ServerEvent::Error {
                conversation_id: Some("c1".into()),
                message: "generation backend unavailable".into(),
            },
        ])
        .await;

        let session = connect_session(&url, SessionConfig::default()).await;
        let mut events = session.subscribe();

        session.join("c1").unwrap();
        wait_for(&mut events, |e| {
            matches!(e, ServerEvent::JoinedConversation { .. })
        })
        .await;

        let optimistic = session.send_message("c1", "hello").unwrap();
        wait_for(&mut events, |e| matches!(e, ServerEvent::Error { .. })).await;

        // Only the optimistic user message survives; no assistant message
        // was produced and the buffer is gone.
        let messages = session.store().messages("c1");
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].id, optimistic.id);
        assert!(!session.store().is_streaming("c1"));
        assert_eq!(session.phase("c1"), SessionPhase::Joined);

        session.close();
    }

    #[tokio::test]
    async fn test_send_without_join_is_rejected_locally() {
        let url = scripted_backend(vec![]).await;
        let session = connect_session(&url, SessionConfig::default()).await;

        let result = session.send_message("c1", "hello");
        assert!(matches!(result, Err(Error::NotJoined { .. })));
        // No optimistic message was inserted.
        assert!(session.store().messages("c1").is_empty());

        session.close();
    }

    #[tokio::test]
    async fn test_generation_timeout_fails_locally() {
        // Backend starts a generation and then goes silent.
        let url = scripted_backend(vec![ServerEvent::MessageStart {
            conversation_id: "c1".into(),
        }])
        .await;

        let session = connect_session(
            &url,
            SessionConfig {
                generation_timeout: Duration::from_millis(50),
            },
        )
        .await;
        let mut events = session.subscribe();

        session.join("c1").unwrap();
        wait_for(&mut events, |e| {
            matches!(e, ServerEvent::JoinedConversation { .. })
        })
        .await;
        session.send_message("c1", "hello").unwrap();

        wait_for(&mut events, |e| matches!(e, ServerEvent::Error { .. })).await;
        assert!(!session.store().is_streaming("c1"));
        assert!(session.store().loading_stage("c1").is_none());
        assert_eq!(session.phase("c1"), SessionPhase::Joined);

        session.close();
    }

    #[tokio::test]
    async fn test_leave_discards_unresolved_generation() {
        let url = scripted_backend(vec![
            ServerEvent::MessageStart {
                conversation_id: "c1".into(),
            },
            ServerEvent::MessageToken {
                conversation_id: "c1".into(),
                message_id: "m1".into(),
                token: "never finished".into(),
            },
        ])
        .await;

        let session = connect_session(&url, SessionConfig::default()).await;
        let mut events = session.subscribe();

        session.join("c1").unwrap();
        wait_for(&mut events, |e| {
            matches!(e, ServerEvent::JoinedConversation { .. })
        })
        .await;
        session.send_message("c1", "hello").unwrap();
        wait_for(&mut events, |e| matches!(e, ServerEvent::MessageToken { .. })).await;
        assert!(session.store().is_streaming("c1"));

        session.leave("c1").unwrap();
        assert!(!session.store().is_streaming("c1"));
        assert_eq!(session.phase("c1"), SessionPhase::Idle);

        session.close();
    }

    #[tokio::test]
    async fn test_overlapping_message_start_is_dropped() {
        let url = scripted_backend(vec![
            ServerEvent::MessageStart {
                conversation_id: "c1".into(),
            },
            ServerEvent::MessageToken {
                conversation_id: "c1".into(),
                message_id: "m1".into(),
                token: "first".into(),
            },
            // Protocol violation: a second start while the first is open.
            ServerEvent::MessageStart {
                conversation_id: "c1".into(),
            },
            ServerEvent::MessageToken {
                conversation_id: "c1".into(),
                message_id: "m1".into(),
                token: " second".into(),
            },
        ])
        .await;

        let session = connect_session(&url, SessionConfig::default()).await;
        let mut events = session.subscribe();

        session.join("c1").unwrap();
        wait_for(&mut events, |e| {
            matches!(e, ServerEvent::JoinedConversation { .. })
        })
        .await;
        session.send_message("c1", "hello").unwrap();

        // The second token still lands in the original buffer.
        wait_for(&mut events, |e| {
            matches!(e, ServerEvent::MessageToken { token, .. } if token == " second")
        })
        .await;
        assert_eq!(
            session.store().streaming_content("c1").as_deref(),
            Some("first second")
        );

        session.close();
    }
}
