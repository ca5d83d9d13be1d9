//! # logos-relay — Room-scoped CRDT update relay for Logos
//!
//! Clients connect over WebSocket to a named room (one document each). Every
//! binary frame a client sends is an opaque Yrs update: the server applies it
//! to the room's authoritative document and forwards the original bytes to
//! every other member of the room. Late joiners receive the full document
//! state once on join.
//!
//! ## Architecture
//!
//! ```text
//!  upgrade request
//!        │
//!        ▼
//! ┌─────────────┐  reject   ┌──────────────┐
//! │ Gatekeeper  │ ────────► │ HTTP 401/403 │
//! │ origin+token│           └──────────────┘
//! └──────┬──────┘
//!        │ accept
//!        ▼
//! ┌─────────────┐   join    ┌──────────────────────────────┐
//! │ Lifecycle   │ ────────► │ RoomRegistry                 │
//! │ (per conn)  │           │  "doc1" ─► Room { doc, peers }│
//! └──────┬──────┘   detach  │  "doc2" ─► Room { doc, peers }│
//!        │        ◄──────── └──────────────┬───────────────┘
//!        ▼                                 │ fan-out (per-peer queues)
//! ┌─────────────┐   relay                  ▼
//! │ Relay loop  │ ───────────────►  other members of the room
//! └─────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`request`] — Room and query parameter resolution for upgrade requests
//! - [`gatekeeper`] — Origin allow-list and signed token checks
//! - [`document`] — Document state capability and the Yrs implementation
//! - [`registry`] — Room table, member sets, fan-out
//! - [`relay`] — Per-connection message loop
//! - [`lifecycle`] — Join / active / leave orchestration
//! - [`server`] — TCP listener, handshake, stats
//! - [`health`] — Plain HTTP liveness responses
//! - [`config`] — Server configuration (TOML + environment)

pub mod config;
pub mod document;
pub mod error;
pub mod gatekeeper;
pub mod health;
pub mod lifecycle;
pub mod registry;
pub mod relay;
pub mod request;
pub mod server;
mod validate;

// Re-exports for convenience
pub use config::{AuthConfig, AuthMode, ConfigError, Environment, ServerConfig};
pub use document::{DocumentError, DocumentFactory, DocumentState, YrsDocument, YrsFactory};
pub use error::RelayError;
pub use gatekeeper::{Gatekeeper, Identity, Rejection, SigningError};
pub use lifecycle::Connection;
pub use registry::{ConnectionId, DetachOutcome, PeerHandle, Room, RoomRegistry};
pub use relay::SessionState;
pub use request::{ConnectRequest, DEFAULT_ROOM};
pub use server::{ServerStats, SyncServer};
