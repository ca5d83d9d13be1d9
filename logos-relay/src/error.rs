//! Relay error taxonomy.
//!
//! Only `Setup`, `WebSocket` and `Io` end a connection. `MalformedUpdate` is
//! dropped by the relay loop and the session continues; `Rejected` never gets
//! past the handshake.

use thiserror::Error;
use tokio_tungstenite::tungstenite;

use crate::document::DocumentError;
use crate::gatekeeper::Rejection;
use crate::registry::ConnectionId;

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Connection rejected: {0}")]
    Rejected(#[from] Rejection),

    #[error("Malformed update dropped: {0}")]
    MalformedUpdate(DocumentError),

    #[error("Connection {conn} is not attached to room {room}")]
    NotAttached { room: String, conn: ConnectionId },

    #[error("Registry inconsistency: {0}")]
    RegistryInconsistency(String),

    #[error("Connection setup failed: {0}")]
    Setup(DocumentError),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RelayError {
    /// Errors the relay loop recovers from without closing the connection.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::MalformedUpdate(_))
    }
}
