//! Connection manager: one shared websocket, reconnect with bounded backoff
//!
//! A [`Connection`] owns a single physical websocket reused across all
//! conversation rooms. A supervisor task keeps the socket alive,
//! reconnecting with bounded exponential backoff; after exhausting its
//! attempt budget it reports a terminal [`ConnectionState::Failed`] instead
//! of retrying forever. Instances are independently constructible so tests
//! can run isolated connections.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;

use folio_wire::{ClientEvent, ServerEvent};

use crate::error::{Error, Result};

/// Reconnection configuration
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnect attempt
    pub base_delay: Duration,
    /// Maximum delay between attempts
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub multiplier: f64,
    /// Consecutive failed attempts before giving up
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            max_attempts: 5,
        }
    }
}

impl ReconnectConfig {
    /// Calculate delay for a given attempt (0-indexed), capped at `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay_secs = self.base_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);
        Duration::from_secs_f64(delay_secs.min(self.max_delay.as_secs_f64()))
    }
}

/// Observable connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// A connect attempt is in progress
    Connecting,
    /// The socket is open
    Connected,
    /// The socket dropped; a reconnect is pending
    Disconnected,
    /// Reconnect attempts are exhausted; terminal
    Failed,
}

/// Capacity of the inbound event fan-out channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// A shared, reconnecting websocket connection to the backend.
pub struct Connection {
    outbound_tx: mpsc::UnboundedSender<ClientEvent>,
    events_tx: broadcast::Sender<ServerEvent>,
    state_rx: watch::Receiver<ConnectionState>,
    cancel: CancellationToken,
}

impl Connection {
    /// Open a connection to `url`, spawning the supervisor task.
    ///
    /// Returns immediately; observe [`Connection::state_changes`] to learn
    /// when the socket is actually up.
    pub fn connect(url: impl Into<String>, config: ReconnectConfig) -> Self {
        let url = url.into();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let cancel = CancellationToken::new();

        tokio::spawn(supervise(
            url,
            config,
            outbound_rx,
            events_tx.clone(),
            state_tx,
            cancel.clone(),
        ));

        Self {
            outbound_tx,
            events_tx,
            state_rx,
            cancel,
        }
    }

    /// Queue an event for sending. Never blocks; events queued while the
    /// socket is down are flushed after reconnect.
    pub fn send(&self, event: ClientEvent) -> Result<()> {
        if self.cancel.is_cancelled() || self.state() == ConnectionState::Failed {
            return Err(Error::ConnectionClosed);
        }
        self.outbound_tx
            .send(event)
            .map_err(|_| Error::ConnectionClosed)
    }

    /// Subscribe to inbound server events.
    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.events_tx.subscribe()
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Watch receiver for connection state changes.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Whether the socket is currently open.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Tear the connection down. The supervisor closes the socket and exits.
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Why the socket pump stopped.
enum PumpExit {
    /// The socket dropped; the supervisor should reconnect
    SocketLost,
    /// We were asked to close
    Cancelled,
}

async fn supervise(
    url: String,
    config: ReconnectConfig,
    mut outbound_rx: mpsc::UnboundedReceiver<ClientEvent>,
    events_tx: broadcast::Sender<ServerEvent>,
    state_tx: watch::Sender<ConnectionState>,
    cancel: CancellationToken,
) {
    let mut attempt = 0u32;

    loop {
        if cancel.is_cancelled() {
            return;
        }
        let _ = state_tx.send(ConnectionState::Connecting);

        let connected = tokio::select! {
            _ = cancel.cancelled() => return,
            result = connect_async(url.as_str()) => result,
        };

        match connected {
            Ok((ws, _)) => {
                attempt = 0;
                let _ = state_tx.send(ConnectionState::Connected);
                tracing::debug!(url = %url, "websocket connected");

                match pump(ws, &mut outbound_rx, &events_tx, &cancel).await {
                    PumpExit::Cancelled => {
                        let _ = state_tx.send(ConnectionState::Disconnected);
                        return;
                    }
                    PumpExit::SocketLost => {
                        tracing::warn!(url = %url, "websocket dropped, reconnecting");
                        let _ = state_tx.send(ConnectionState::Disconnected);
                    }
                }
            }
            Err(e) => {
                attempt += 1;
                if attempt >= config.max_attempts {
                    tracing::error!(
                        url = %url,
                        attempts = attempt,
                        "giving up on websocket after repeated failures: {e}"
                    );
                    let _ = state_tx.send(ConnectionState::Failed);
                    return;
                }
                let delay = config.delay_for_attempt(attempt - 1);
                tracing::warn!(
                    url = %url,
                    attempt,
                    max = config.max_attempts,
                    "websocket connect failed: {e}; retrying in {delay:?}"
                );
                let _ = state_tx.send(ConnectionState::Disconnected);
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
}

/// Drive one open socket: drain the outbound queue, fan inbound frames out
/// to subscribers. Returns when the socket drops or we are cancelled.
async fn pump(
    mut ws: WsStream,
    outbound_rx: &mut mpsc::UnboundedReceiver<ClientEvent>,
    events_tx: &broadcast::Sender<ServerEvent>,
    cancel: &CancellationToken,
) -> PumpExit {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = ws.close(None).await;
                return PumpExit::Cancelled;
            }
            outbound = outbound_rx.recv() => {
                let Some(event) = outbound else {
                    // All senders dropped; treat as an explicit close.
                    let _ = ws.close(None).await;
                    return PumpExit::Cancelled;
                };
                let frame = match event.to_frame() {
                    Ok(frame) => frame,
                    Err(e) => {
                        tracing::warn!("failed to encode outbound event: {e}");
                        continue;
                    }
                };
                if ws.send(WsMessage::Text(frame)).await.is_err() {
                    return PumpExit::SocketLost;
                }
            }
            inbound = ws.next() => {
                match inbound {
                    Some(Ok(WsMessage::Text(text))) => {
                        match ServerEvent::from_frame(&text) {
                            Ok(event) => {
                                // No subscribers is fine; events are droppable
                                // until a session attaches.
                                let _ = events_tx.send(event);
                            }
                            Err(e) => {
                                tracing::warn!("skipping unparseable frame: {e}");
                            }
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => {
                        return PumpExit::SocketLost;
                    }
                    // Binary/ping/pong frames carry no protocol events.
                    Some(Ok(_)) => {}
                }
            }
        }
    }
}
