//! Per-connection update relay.
//!
//! One loop per connection, multiplexing two sources with `tokio::select!`:
//!
//! ```text
//!   socket ──Binary──► registry.relay(room) ──► other members' queues
//!   own queue ◄────── catch-up + peers' updates ──► socket
//! ```
//!
//! Updates from one connection are relayed in arrival order because the loop
//! handles one inbound frame at a time. Malformed updates are dropped and the
//! session continues.

use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use crate::error::RelayError;
use crate::registry::{ConnectionId, Room, RoomRegistry};

/// Connection state machine: `Joining -> Active -> Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Joining,
    Active,
    /// Terminal
    Closed,
}

impl SessionState {
    /// Move `Joining` to `Active`. Any other state is left unchanged.
    pub fn activate(self) -> Self {
        match self {
            Self::Joining => Self::Active,
            other => other,
        }
    }

    pub fn is_closed(self) -> bool {
        self == Self::Closed
    }
}

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Client sent a close frame or the stream ended
    ClientClosed,
    /// Read or write failed
    Transport(String),
    /// Outbound queue overflowed and the registry dropped this member
    Evicted,
    /// Join could not complete
    SetupFailed,
    /// Unexpected failure inside the session
    Internal(String),
}

impl CloseReason {
    /// Close frame to send for server-initiated closes.
    pub fn close_frame(&self) -> Option<CloseFrame> {
        let (code, reason) = match self {
            Self::ClientClosed | Self::Transport(_) => return None,
            Self::Evicted => (CloseCode::Again, "Outbound queue overflow"),
            Self::SetupFailed => (CloseCode::Error, "Connection setup failed"),
            Self::Internal(_) => (CloseCode::Error, "Internal error"),
        };
        Some(CloseFrame {
            code,
            reason: reason.into(),
        })
    }
}

/// Lock-free relay counters shared by all sessions.
#[derive(Debug, Default)]
pub struct RelayCounters {
    pub messages: AtomicU64,
    pub bytes: AtomicU64,
    pub malformed: AtomicU64,
}

impl RelayCounters {
    fn record(&self, len: usize) {
        self.messages.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(len as u64, Ordering::Relaxed);
    }
}

/// Drive an active session until it closes.
///
/// `outbound` is this connection's queue; the matching sender lives in the
/// registry. When the registry drops it (eviction), the session ends.
pub async fn run<S>(
    ws: WebSocketStream<S>,
    id: ConnectionId,
    room: &Room,
    registry: &RoomRegistry,
    mut outbound: mpsc::Receiver<Bytes>,
    counters: &RelayCounters,
) -> CloseReason
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (mut ws_sender, mut ws_receiver) = ws.split();

    let reason = loop {
        tokio::select! {
            // Incoming WebSocket message
            msg = ws_receiver.next() => {
                match msg {
                    Some(Ok(Message::Binary(data))) => {
                        counters.record(data.len());
                        match registry.relay(room, id, data).await {
                            Ok(n) => log::trace!("Relayed update from {id} to {n} peers in {}", room.name()),
                            Err(e) if e.is_recoverable() => {
                                counters.malformed.fetch_add(1, Ordering::Relaxed);
                                log::warn!("Dropping update from {id} in {}: {e}", room.name());
                            }
                            Err(RelayError::NotAttached { .. }) => break CloseReason::Evicted,
                            Err(e) => break CloseReason::Internal(e.to_string()),
                        }
                    }

                    Some(Ok(Message::Text(_))) => {
                        log::debug!("Ignoring text frame from {id}");
                    }

                    Some(Ok(Message::Close(_))) | None => break CloseReason::ClientClosed,

                    Some(Err(e)) => break CloseReason::Transport(e.to_string()),

                    // Ping/pong are answered by tungstenite
                    Some(Ok(_)) => {}
                }
            }

            // Outgoing catch-up or peer update
            blob = outbound.recv() => {
                match blob {
                    Some(data) => {
                        if let Err(e) = ws_sender.send(Message::Binary(data)).await {
                            break CloseReason::Transport(e.to_string());
                        }
                    }
                    None => break CloseReason::Evicted,
                }
            }
        }
    };

    if let Some(frame) = reason.close_frame() {
        let _ = ws_sender.send(Message::Close(Some(frame))).await;
    }
    let _ = ws_sender.close().await;
    reason
}
