//! WebSocket relay server.
//!
//! Architecture:
//! ```text
//! TcpListener ──accept──► task per connection
//!                            │
//!                            ├── plain HTTP? ──► health::respond_if_plain_http
//!                            │
//!                            ├── accept_hdr_async(callback = Gatekeeper)
//!                            │        │ reject ──► 401/403, no room touched
//!                            │        ▼ accept
//!                            └── Lifecycle::serve ──► RoomRegistry
//! ```
//!
//! One tokio task per connection. A failing or panicking connection only
//! ends its own task.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{header, StatusCode};

use crate::config::{AuthMode, ServerConfig};
use crate::document::DocumentFactory;
use crate::error::RelayError;
use crate::gatekeeper::{Gatekeeper, Identity, Rejection};
use crate::health;
use crate::lifecycle::{Connection, Lifecycle};
use crate::registry::RoomRegistry;
use crate::request::ConnectRequest;

/// Server statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub rejected_connections: u64,
    pub total_messages: u64,
    pub total_bytes: u64,
    pub malformed_updates: u64,
    pub active_rooms: usize,
}

#[derive(Debug, Default)]
struct ConnectionCounters {
    total: AtomicU64,
    active: AtomicU64,
    rejected: AtomicU64,
}

/// Decrements the active connection count when the task ends.
struct ActiveGuard<'a>(&'a AtomicU64);

impl<'a> ActiveGuard<'a> {
    fn new(counter: &'a AtomicU64) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        Self(counter)
    }
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

/// State shared by every connection task.
struct Shared {
    gatekeeper: Gatekeeper,
    lifecycle: Lifecycle,
    counters: ConnectionCounters,
}

/// The relay server.
pub struct SyncServer {
    config: ServerConfig,
    shared: Arc<Shared>,
}

impl SyncServer {
    /// Create a server backed by Yrs documents.
    pub fn new(config: ServerConfig) -> Self {
        Self::with_registry(config, Arc::new(RoomRegistry::default()))
    }

    /// Create a server whose rooms use documents from `factory`.
    pub fn with_factory(config: ServerConfig, factory: Arc<dyn DocumentFactory>) -> Self {
        Self::with_registry(config, Arc::new(RoomRegistry::new(factory)))
    }

    fn with_registry(config: ServerConfig, registry: Arc<RoomRegistry>) -> Self {
        let shared = Arc::new(Shared {
            gatekeeper: Gatekeeper::new(&config.auth),
            lifecycle: Lifecycle::new(registry, config.outbound_capacity),
            counters: ConnectionCounters::default(),
        });
        Self { config, shared }
    }

    /// Bind the configured address and serve until the listener fails.
    pub async fn run(&self) -> Result<(), RelayError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), RelayError> {
        let local = listener.local_addr()?;
        log::info!("Relay server listening on {local}");
        log::info!(
            "Auth mode: {:?}, secret configured: {}, environment: {:?}",
            self.config.auth.mode,
            self.shared.gatekeeper.has_secret(),
            self.config.auth.environment
        );
        if self.config.auth.mode == AuthMode::Token && !self.shared.gatekeeper.has_secret() {
            log::warn!("Token mode without a signing secret: every connection will be rejected");
        }

        loop {
            let (stream, addr) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    log::error!("Failed to accept connection: {e}");
                    continue;
                }
            };
            log::debug!("New TCP connection from {addr}");

            let shared = self.shared.clone();
            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(stream, addr, &shared).await {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    /// Handle a single TCP connection.
    async fn handle_connection(
        mut stream: TcpStream,
        addr: SocketAddr,
        shared: &Shared,
    ) -> Result<(), RelayError> {
        let registry = shared.lifecycle.registry();
        if health::respond_if_plain_http(&mut stream, registry).await? {
            return Ok(());
        }

        shared.counters.total.fetch_add(1, Ordering::Relaxed);

        let mut outcome: Option<Result<(String, Option<Identity>), Rejection>> = None;
        let callback = |req: &Request, response: Response| -> Result<Response, ErrorResponse> {
            let origin = req
                .headers()
                .get(header::ORIGIN)
                .and_then(|v| v.to_str().ok());
            let request = ConnectRequest::new(origin, req.uri().path(), req.uri().query());

            match shared.gatekeeper.evaluate(&request) {
                Ok(identity) => {
                    outcome = Some(Ok((request.room(), identity)));
                    Ok(response)
                }
                Err(rejection) => {
                    let status = if rejection.is_origin() {
                        StatusCode::FORBIDDEN
                    } else {
                        StatusCode::UNAUTHORIZED
                    };
                    let mut refusal = ErrorResponse::new(Some(rejection.to_string()));
                    *refusal.status_mut() = status;
                    outcome = Some(Err(rejection));
                    Err(refusal)
                }
            }
        };

        let handshake = tokio_tungstenite::accept_hdr_async(stream, callback).await;
        let (ws, conn) = match (handshake, outcome) {
            (Ok(ws), Some(Ok((room, identity)))) => {
                (ws, Connection::new(room, identity, Some(addr)))
            }
            (_, Some(Err(rejection))) => {
                shared.counters.rejected.fetch_add(1, Ordering::Relaxed);
                log::debug!("Handshake from {addr} refused: {rejection}");
                return Ok(());
            }
            (Err(e), _) => return Err(e.into()),
            (Ok(_), None) => {
                return Err(RelayError::RegistryInconsistency(
                    "handshake completed without a gatekeeper decision".to_string(),
                ))
            }
        };

        let _active = ActiveGuard::new(&shared.counters.active);
        shared.lifecycle.serve(ws, conn).await;
        Ok(())
    }

    /// Snapshot of server statistics.
    pub async fn stats(&self) -> ServerStats {
        let counters = &self.shared.counters;
        let relay = self.shared.lifecycle.counters();
        ServerStats {
            total_connections: counters.total.load(Ordering::Relaxed),
            active_connections: counters.active.load(Ordering::Relaxed),
            rejected_connections: counters.rejected.load(Ordering::Relaxed),
            total_messages: relay.messages.load(Ordering::Relaxed),
            total_bytes: relay.bytes.load(Ordering::Relaxed),
            malformed_updates: relay.malformed.load(Ordering::Relaxed),
            active_rooms: self.registry().room_count().await,
        }
    }

    /// Get the configured bind address.
    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    /// Room registry (read-only queries such as room count).
    pub fn registry(&self) -> &Arc<RoomRegistry> {
        self.shared.lifecycle.registry()
    }
}
