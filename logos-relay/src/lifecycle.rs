//! Connection lifecycle: join, active relay, leave.
//!
//! Runs after the gatekeeper accepted the handshake:
//! 1. `join` the room (creates its document on first join) and queue catch-up
//! 2. hand the socket to [`relay::run`] until it closes
//! 3. `detach` exactly once, whatever ended the session (including a panic)

use std::any::Any;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;

use crate::gatekeeper::Identity;
use crate::registry::{ConnectionId, DetachOutcome, PeerHandle, RoomRegistry};
use crate::relay::{self, CloseReason, RelayCounters, SessionState};

/// A live connection. Belongs to exactly one room for its whole life.
#[derive(Debug, Clone)]
pub struct Connection {
    pub id: ConnectionId,
    pub room: String,
    /// Token identity, `None` in open mode
    pub identity: Option<Identity>,
    pub addr: Option<SocketAddr>,
}

impl Connection {
    pub fn new(room: impl Into<String>, identity: Option<Identity>, addr: Option<SocketAddr>) -> Self {
        Self {
            id: ConnectionId::new(),
            room: room.into(),
            identity,
            addr,
        }
    }

    fn user(&self) -> &str {
        self.identity
            .as_ref()
            .map(|i| i.user_id.as_str())
            .unwrap_or("anonymous")
    }
}

/// Orchestrates join / relay / leave for accepted connections.
pub struct Lifecycle {
    registry: Arc<RoomRegistry>,
    outbound_capacity: usize,
    counters: Arc<RelayCounters>,
}

impl Lifecycle {
    pub fn new(registry: Arc<RoomRegistry>, outbound_capacity: usize) -> Self {
        Self {
            registry,
            outbound_capacity: outbound_capacity.max(1),
            counters: Arc::new(RelayCounters::default()),
        }
    }

    pub fn registry(&self) -> &Arc<RoomRegistry> {
        &self.registry
    }

    pub fn counters(&self) -> &Arc<RelayCounters> {
        &self.counters
    }

    /// Serve one accepted WebSocket until it closes.
    pub async fn serve<S>(&self, mut ws: WebSocketStream<S>, conn: Connection) -> CloseReason
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut state = SessionState::Joining;
        let (tx, rx) = mpsc::channel(self.outbound_capacity);

        let room = match self
            .registry
            .join(&conn.room, PeerHandle::new(conn.id, tx))
            .await
        {
            Ok(room) => room,
            Err(e) => {
                log::error!("Connection setup error for {} in {}: {e}", conn.id, conn.room);
                let reason = CloseReason::SetupFailed;
                if let Err(e) = ws.close(reason.close_frame()).await {
                    log::debug!("Failed to close errored connection {}: {e}", conn.id);
                }
                return reason;
            }
        };

        state = state.activate();
        log::info!(
            "Client connected: id={}, addr={}, room={}, user={}",
            conn.id,
            conn.addr.map(|a| a.to_string()).unwrap_or_else(|| "unknown".into()),
            conn.room,
            conn.user()
        );

        let session = relay::run(ws, conn.id, &room, &self.registry, rx, &self.counters);
        let reason = AssertUnwindSafe(session)
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                let msg = panic_message(panic.as_ref());
                log::error!("Session {} in {} panicked: {msg}", conn.id, conn.room);
                CloseReason::Internal(msg)
            });

        self.leave(&conn, &mut state).await;
        log::info!(
            "Client disconnected: id={}, room={}, reason={reason:?}",
            conn.id,
            conn.room
        );
        reason
    }

    /// Detach from the registry unless already closed.
    async fn leave(&self, conn: &Connection, state: &mut SessionState) {
        if state.is_closed() {
            return;
        }
        *state = SessionState::Closed;

        match self.registry.detach(&conn.room, conn.id).await {
            DetachOutcome::RoomClosed => log::debug!("{} was the last member of {}", conn.id, conn.room),
            DetachOutcome::Left => {}
            // Already evicted by a broadcaster
            DetachOutcome::NotMember | DetachOutcome::UnknownRoom => {
                log::debug!("{} was no longer attached to {}", conn.id, conn.room)
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
