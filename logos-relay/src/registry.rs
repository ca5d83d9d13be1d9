//! Room registry: room name → (document, member set).
//!
//! Locking discipline:
//! - The room table (`RwLock<HashMap>`) is held only to look up, insert or
//!   remove an `Arc<Room>`. It is never held while waiting on a room.
//! - Each room has its own `Mutex<RoomState>`. Applies, fan-out, attach and
//!   detach of a member all happen under it, so one room's traffic never
//!   waits on another room.
//! - The last leave discards the document under the room lock (the room is
//!   then closed) and removes the table entry afterwards. A join that finds a
//!   closed room replaces it; a join that raced the close retries.
//!
//! Fan-out pushes into bounded per-connection queues with `try_send`, so a
//! slow peer never stalls the sender. A peer whose queue is full is evicted.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex, RwLock};
use uuid::Uuid;

use crate::document::{DocumentFactory, DocumentState, YrsFactory};
use crate::error::RelayError;

/// Unique id of one live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Per-recipient delivery failure. Never fatal for the sender.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("outbound queue full")]
    Lagged,
    #[error("connection closed")]
    Closed,
}

/// Non-owning handle to a connection's outbound queue.
///
/// Dropping it from the registry never closes the transport; the transport
/// closing makes further deliveries fail with [`DeliveryError::Closed`].
#[derive(Debug, Clone)]
pub struct PeerHandle {
    id: ConnectionId,
    tx: mpsc::Sender<Bytes>,
}

impl PeerHandle {
    pub fn new(id: ConnectionId, tx: mpsc::Sender<Bytes>) -> Self {
        Self { id, tx }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queue a blob for this peer without waiting.
    pub fn deliver(&self, blob: Bytes) -> Result<(), DeliveryError> {
        self.tx.try_send(blob).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryError::Lagged,
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }
}

/// Result of a [`RoomRegistry::detach`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetachOutcome {
    /// Member removed, others remain
    Left,
    /// Last member removed; room and document discarded
    RoomClosed,
    /// Room exists but the connection was not a member (already detached)
    NotMember,
    /// No such room
    UnknownRoom,
}

struct RoomState {
    /// `None` once the room has been destroyed
    doc: Option<Box<dyn DocumentState>>,
    members: HashMap<ConnectionId, PeerHandle>,
}

impl RoomState {
    fn members_except(&self, except: ConnectionId) -> impl Iterator<Item = &PeerHandle> {
        self.members.values().filter(move |p| p.id != except)
    }
}

/// One document room.
pub struct Room {
    name: String,
    /// Mirrors `doc.is_none()` so the table can skip closed rooms without
    /// taking the room lock
    closed: AtomicBool,
    state: Mutex<RoomState>,
}

impl Room {
    fn new(name: &str, doc: Box<dyn DocumentState>) -> Self {
        Self {
            name: name.to_string(),
            closed: AtomicBool::new(false),
            state: Mutex::new(RoomState {
                doc: Some(doc),
                members: HashMap::new(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Owns every live room.
pub struct RoomRegistry {
    rooms: RwLock<HashMap<String, Arc<Room>>>,
    factory: Arc<dyn DocumentFactory>,
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new(Arc::new(YrsFactory))
    }
}

impl RoomRegistry {
    pub fn new(factory: Arc<dyn DocumentFactory>) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            factory,
        }
    }

    /// Join a room: get-or-create it, then attach `peer`.
    ///
    /// Creation runs under the table write lock, so two first joiners create
    /// exactly one document. Attach runs under the room lock only. If the
    /// room closed in between, the join starts over on a fresh room. If the
    /// room's document is non-empty, its full encoding is queued to `peer`
    /// before it becomes visible to broadcasters.
    pub async fn join(&self, name: &str, peer: PeerHandle) -> Result<Arc<Room>, RelayError> {
        loop {
            let room = self.get_or_create(name).await?;
            if Self::attach(&room, &peer).await {
                return Ok(room);
            }
            log::debug!("Room {name} closed during join of {}, retrying", peer.id);
        }
    }

    async fn get_or_create(&self, name: &str) -> Result<Arc<Room>, RelayError> {
        if let Some(room) = self.rooms.read().await.get(name) {
            if !room.is_closed() {
                return Ok(room.clone());
            }
        }

        let mut rooms = self.rooms.write().await;
        if let Some(room) = rooms.get(name) {
            if !room.is_closed() {
                return Ok(room.clone());
            }
        }
        let doc = self.factory.create(name).map_err(RelayError::Setup)?;
        let room = Arc::new(Room::new(name, doc));
        rooms.insert(name.to_string(), room.clone());
        log::info!("Room {name} created ({} active)", rooms.len());
        Ok(room)
    }

    /// Returns false if the room was closed before the lock was acquired.
    async fn attach(room: &Room, peer: &PeerHandle) -> bool {
        let mut state = room.state.lock().await;
        let Some(doc) = state.doc.as_ref() else {
            return false;
        };

        if !doc.is_empty() {
            let catch_up = Bytes::from(doc.encode_full());
            let len = catch_up.len();
            match peer.deliver(catch_up) {
                Ok(()) => log::debug!("Queued {len}-byte catch-up for {} in {}", peer.id, room.name),
                Err(e) => log::debug!("Catch-up for {} in {} not queued: {e}", peer.id, room.name),
            }
        }

        state.members.insert(peer.id, peer.clone());
        true
    }

    /// Remove a member. Destroys the room when it was the last one.
    ///
    /// Calling it again for the same connection is a no-op.
    pub async fn detach(&self, name: &str, id: ConnectionId) -> DetachOutcome {
        let Some(room) = self.room(name).await else {
            log::warn!("Detach of {id} from unknown room {name}");
            return DetachOutcome::UnknownRoom;
        };

        {
            let mut state = room.state.lock().await;
            if state.members.remove(&id).is_none() {
                log::debug!("Detach of {id} from {name}: not a member");
                return DetachOutcome::NotMember;
            }
            if !state.members.is_empty() {
                return DetachOutcome::Left;
            }
            state.doc = None;
            room.closed.store(true, Ordering::Release);
        }

        // A joiner may already have replaced the closed room
        let mut rooms = self.rooms.write().await;
        if rooms.get(name).is_some_and(|current| Arc::ptr_eq(current, &room)) {
            rooms.remove(name);
        }
        log::info!("Room {name} removed (empty, {} active)", rooms.len());
        DetachOutcome::RoomClosed
    }

    /// Apply `blob` to the room's document and fan the original bytes out to
    /// every member except `from`.
    ///
    /// Returns the number of peers the blob was queued for. A blob that fails
    /// to apply is reported as [`RelayError::MalformedUpdate`] and reaches
    /// nobody. Peers with a full queue are evicted after the room lock is
    /// released.
    pub async fn relay(
        &self,
        room: &Room,
        from: ConnectionId,
        blob: Bytes,
    ) -> Result<usize, RelayError> {
        let mut lagged = Vec::new();
        let delivered = {
            let mut state = room.state.lock().await;

            if !state.members.contains_key(&from) {
                return Err(RelayError::NotAttached {
                    room: room.name.clone(),
                    conn: from,
                });
            }
            let doc = state.doc.as_mut().ok_or_else(|| {
                RelayError::RegistryInconsistency(format!("relay into discarded room {}", room.name))
            })?;
            doc.apply(&blob).map_err(RelayError::MalformedUpdate)?;

            let mut delivered = 0;
            for peer in state.members_except(from) {
                match peer.deliver(blob.clone()) {
                    Ok(()) => delivered += 1,
                    Err(DeliveryError::Lagged) => lagged.push(peer.id),
                    Err(DeliveryError::Closed) => {
                        log::debug!("Skipping closed peer {} in {}", peer.id, room.name)
                    }
                }
            }
            delivered
        };

        for id in lagged {
            log::warn!("Evicting lagging peer {id} from room {}", room.name);
            self.detach(&room.name, id).await;
        }
        Ok(delivered)
    }

    /// Every member of `name` other than `except`.
    pub async fn members_except(&self, name: &str, except: ConnectionId) -> Vec<PeerHandle> {
        let Some(room) = self.room(name).await else {
            return Vec::new();
        };
        let state = room.state.lock().await;
        state.members_except(except).cloned().collect()
    }

    async fn room(&self, name: &str) -> Option<Arc<Room>> {
        self.rooms.read().await.get(name).cloned()
    }

    /// Number of open rooms.
    pub async fn room_count(&self) -> usize {
        let rooms = self.rooms.read().await;
        rooms.values().filter(|room| !room.is_closed()).count()
    }

    pub async fn contains(&self, name: &str) -> bool {
        let rooms = self.rooms.read().await;
        rooms.get(name).is_some_and(|room| !room.is_closed())
    }

    /// Number of members in `name`, zero if the room does not exist.
    pub async fn member_count(&self, name: &str) -> usize {
        match self.room(name).await {
            Some(room) => room.state.lock().await.members.len(),
            None => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::DocumentError;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    /// Appends every update; rejects blobs starting with 0xFF.
    #[derive(Default)]
    struct LogDoc {
        applied: Vec<Vec<u8>>,
    }

    impl DocumentState for LogDoc {
        fn apply(&mut self, update: &[u8]) -> Result<(), DocumentError> {
            if update.first() == Some(&0xFF) {
                return Err(DocumentError::Malformed("bad marker".to_string()));
            }
            if !self.applied.iter().any(|u| u == update) {
                self.applied.push(update.to_vec());
            }
            Ok(())
        }

        fn encode_full(&self) -> Vec<u8> {
            self.applied.concat()
        }

        fn encode_delta(&self, _state_vector: &[u8]) -> Result<Vec<u8>, DocumentError> {
            Ok(self.encode_full())
        }

        fn is_empty(&self) -> bool {
            self.applied.is_empty()
        }
    }

    #[derive(Default)]
    struct CountingFactory {
        created: AtomicUsize,
    }

    impl DocumentFactory for CountingFactory {
        fn create(&self, _room: &str) -> Result<Box<dyn DocumentState>, DocumentError> {
            self.created.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(LogDoc::default()))
        }
    }

    struct FailingFactory;

    impl DocumentFactory for FailingFactory {
        fn create(&self, room: &str) -> Result<Box<dyn DocumentState>, DocumentError> {
            Err(DocumentError::Create(format!("no backing store for {room}")))
        }
    }

    fn registry() -> (Arc<RoomRegistry>, Arc<CountingFactory>) {
        let factory = Arc::new(CountingFactory::default());
        (Arc::new(RoomRegistry::new(factory.clone())), factory)
    }

    fn peer(capacity: usize) -> (PeerHandle, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(capacity);
        (PeerHandle::new(ConnectionId::new(), tx), rx)
    }

    #[tokio::test]
    async fn test_join_creates_room_once() {
        let (registry, factory) = registry();
        let (a, _rx_a) = peer(8);
        let (b, _rx_b) = peer(8);

        let room1 = registry.join("doc1", a).await.unwrap();
        let room2 = registry.join("doc1", b).await.unwrap();

        assert!(Arc::ptr_eq(&room1, &room2));
        assert_eq!(factory.created.load(Ordering::SeqCst), 1);
        assert_eq!(registry.room_count().await, 1);
        assert_eq!(registry.member_count("doc1").await, 2);
    }

    #[tokio::test]
    async fn test_concurrent_first_joins_create_one_document() {
        let (registry, factory) = registry();
        let mut handles = Vec::new();
        let mut receivers = Vec::new();

        for _ in 0..32 {
            let (p, rx) = peer(8);
            receivers.push(rx);
            let registry = registry.clone();
            handles.push(tokio::spawn(async move { registry.join("shared", p).await }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(factory.created.load(Ordering::SeqCst), 1);
        assert_eq!(registry.member_count("shared").await, 32);
    }

    #[tokio::test]
    async fn test_detach_last_member_destroys_room() {
        let (registry, _) = registry();
        let (a, _rx_a) = peer(8);
        let (b, _rx_b) = peer(8);
        let (a_id, b_id) = (a.id(), b.id());

        let room = registry.join("doc1", a).await.unwrap();
        registry.join("doc1", b).await.unwrap();

        assert_eq!(registry.detach("doc1", a_id).await, DetachOutcome::Left);
        assert!(registry.contains("doc1").await);

        assert_eq!(registry.detach("doc1", b_id).await, DetachOutcome::RoomClosed);
        assert!(!registry.contains("doc1").await);
        assert_eq!(registry.room_count().await, 0);
        assert!(room.is_closed());
    }

    #[tokio::test]
    async fn test_detach_is_idempotent() {
        let (registry, _) = registry();
        let (a, _rx_a) = peer(8);
        let (b, _rx_b) = peer(8);
        let a_id = a.id();
        registry.join("doc1", a).await.unwrap();
        registry.join("doc1", b).await.unwrap();

        assert_eq!(registry.detach("doc1", a_id).await, DetachOutcome::Left);
        assert_eq!(registry.detach("doc1", a_id).await, DetachOutcome::NotMember);
        assert_eq!(registry.member_count("doc1").await, 1);
    }

    #[tokio::test]
    async fn test_detach_unknown_room() {
        let (registry, _) = registry();
        assert_eq!(
            registry.detach("nowhere", ConnectionId::new()).await,
            DetachOutcome::UnknownRoom
        );
    }

    #[tokio::test]
    async fn test_rejoin_after_close_creates_fresh_document() {
        let (registry, factory) = registry();
        let (a, _rx_a) = peer(8);
        let a_id = a.id();
        let room = registry.join("doc1", a).await.unwrap();
        registry.relay(&room, a_id, Bytes::from_static(b"U1")).await.unwrap();
        registry.detach("doc1", a_id).await;

        let (b, mut rx_b) = peer(8);
        registry.join("doc1", b).await.unwrap();

        assert_eq!(factory.created.load(Ordering::SeqCst), 2);
        assert!(rx_b.try_recv().is_err(), "fresh room has no catch-up");
    }

    #[tokio::test]
    async fn test_relay_fans_out_to_others_only() {
        let (registry, _) = registry();
        let (a, mut rx_a) = peer(8);
        let (b, mut rx_b) = peer(8);
        let (c, mut rx_c) = peer(8);
        let a_id = a.id();

        let room = registry.join("doc1", a).await.unwrap();
        registry.join("doc1", b).await.unwrap();
        registry.join("doc1", c).await.unwrap();

        let delivered = registry
            .relay(&room, a_id, Bytes::from_static(b"U1"))
            .await
            .unwrap();

        assert_eq!(delivered, 2);
        assert_eq!(rx_b.recv().await.unwrap(), Bytes::from_static(b"U1"));
        assert_eq!(rx_c.recv().await.unwrap(), Bytes::from_static(b"U1"));
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_relay_isolated_between_rooms() {
        let (registry, _) = registry();
        let (a, _rx_a) = peer(8);
        let (b, mut rx_b) = peer(8);
        let a_id = a.id();

        let room1 = registry.join("doc1", a).await.unwrap();
        registry.join("doc2", b).await.unwrap();

        let delivered = registry
            .relay(&room1, a_id, Bytes::from_static(b"U1"))
            .await
            .unwrap();
        assert_eq!(delivered, 0);
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_malformed_update_reaches_nobody() {
        let (registry, _) = registry();
        let (a, _rx_a) = peer(8);
        let (b, mut rx_b) = peer(8);
        let a_id = a.id();

        let room = registry.join("doc1", a).await.unwrap();
        registry.join("doc1", b).await.unwrap();

        let result = registry
            .relay(&room, a_id, Bytes::from_static(&[0xFF, 0x00]))
            .await;
        assert!(matches!(result, Err(RelayError::MalformedUpdate(_))));
        assert!(rx_b.try_recv().is_err());

        // Sender is still attached and can keep relaying
        assert_eq!(registry.member_count("doc1").await, 2);
        registry
            .relay(&room, a_id, Bytes::from_static(b"ok"))
            .await
            .unwrap();
        assert_eq!(rx_b.recv().await.unwrap(), Bytes::from_static(b"ok"));
    }

    #[tokio::test]
    async fn test_relay_preserves_sender_order() {
        let (registry, _) = registry();
        let (a, _rx_a) = peer(64);
        let (b, mut rx_b) = peer(64);
        let a_id = a.id();

        let room = registry.join("doc1", a).await.unwrap();
        registry.join("doc1", b).await.unwrap();

        for i in 0..20u8 {
            registry.relay(&room, a_id, Bytes::from(vec![i])).await.unwrap();
        }
        for i in 0..20u8 {
            assert_eq!(rx_b.recv().await.unwrap(), Bytes::from(vec![i]));
        }
    }

    #[tokio::test]
    async fn test_catch_up_on_join() {
        let (registry, _) = registry();
        let (a, _rx_a) = peer(8);
        let a_id = a.id();
        let room = registry.join("doc1", a).await.unwrap();
        registry.relay(&room, a_id, Bytes::from_static(b"U1")).await.unwrap();

        let (b, mut rx_b) = peer(8);
        registry.join("doc1", b).await.unwrap();

        assert_eq!(rx_b.recv().await.unwrap(), Bytes::from_static(b"U1"));
    }

    #[tokio::test]
    async fn test_no_catch_up_for_empty_document() {
        let (registry, _) = registry();
        let (a, mut rx_a) = peer(8);
        registry.join("doc1", a).await.unwrap();
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_closed_peer_skipped() {
        let (registry, _) = registry();
        let (a, _rx_a) = peer(8);
        let (b, rx_b) = peer(8);
        let (c, mut rx_c) = peer(8);
        let a_id = a.id();

        let room = registry.join("doc1", a).await.unwrap();
        registry.join("doc1", b).await.unwrap();
        registry.join("doc1", c).await.unwrap();
        drop(rx_b);

        let delivered = registry
            .relay(&room, a_id, Bytes::from_static(b"U1"))
            .await
            .unwrap();
        assert_eq!(delivered, 1);
        assert_eq!(rx_c.recv().await.unwrap(), Bytes::from_static(b"U1"));
    }

    #[tokio::test]
    async fn test_lagging_peer_evicted() {
        let (registry, _) = registry();
        let (a, _rx_a) = peer(8);
        let (slow, _rx_slow) = peer(1);
        let (fast, mut rx_fast) = peer(8);
        let (a_id, slow_id) = (a.id(), slow.id());

        let room = registry.join("doc1", a).await.unwrap();
        registry.join("doc1", slow).await.unwrap();
        registry.join("doc1", fast).await.unwrap();

        registry.relay(&room, a_id, Bytes::from_static(b"1")).await.unwrap();
        registry.relay(&room, a_id, Bytes::from_static(b"2")).await.unwrap();

        let remaining = registry.members_except("doc1", a_id).await;
        assert_eq!(remaining.len(), 1);
        assert!(remaining.iter().all(|p| p.id() != slow_id));
        assert_eq!(rx_fast.recv().await.unwrap(), Bytes::from_static(b"1"));
        assert_eq!(rx_fast.recv().await.unwrap(), Bytes::from_static(b"2"));
    }

    #[tokio::test]
    async fn test_relay_from_detached_connection() {
        let (registry, _) = registry();
        let (a, _rx_a) = peer(8);
        let (b, _rx_b) = peer(8);
        let a_id = a.id();
        let room = registry.join("doc1", a).await.unwrap();
        registry.join("doc1", b).await.unwrap();
        registry.detach("doc1", a_id).await;

        let result = registry.relay(&room, a_id, Bytes::from_static(b"late")).await;
        assert!(matches!(result, Err(RelayError::NotAttached { .. })));
    }

    #[tokio::test]
    async fn test_members_except() {
        let (registry, _) = registry();
        let (a, _rx_a) = peer(8);
        let (b, _rx_b) = peer(8);
        let (a_id, b_id) = (a.id(), b.id());
        registry.join("doc1", a).await.unwrap();
        registry.join("doc1", b).await.unwrap();

        let others = registry.members_except("doc1", a_id).await;
        assert_eq!(others.len(), 1);
        assert_eq!(others[0].id(), b_id);

        registry.detach("doc1", b_id).await;
        assert!(registry.members_except("doc1", a_id).await.is_empty());
        assert!(registry.members_except("missing", a_id).await.is_empty());
    }

    #[tokio::test]
    async fn test_setup_failure_leaves_no_room() {
        let registry = RoomRegistry::new(Arc::new(FailingFactory));
        let (a, _rx_a) = peer(8);

        let result = registry.join("doc1", a).await;
        assert!(matches!(result, Err(RelayError::Setup(_))));
        assert_eq!(registry.room_count().await, 0);
    }

    #[tokio::test]
    async fn test_busy_room_does_not_block_other_rooms() {
        let (registry, _) = registry();
        let (a, _rx_a) = peer(8);
        let busy = registry.join("busy", a).await.unwrap();

        // Hold the busy room as a long apply or catch-up encode would
        let guard = busy.state.lock().await;

        let (late, _rx_late) = peer(8);
        let waiting = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.join("busy", late).await })
        };
        tokio::task::yield_now().await;

        let (b, _rx_b) = peer(8);
        let b_id = b.id();
        let quiet = tokio::time::timeout(Duration::from_millis(500), async {
            registry.join("quiet", b).await.unwrap();
            registry.detach("quiet", b_id).await
        })
        .await
        .expect("join and leave in another room must not wait on the busy room");
        assert_eq!(quiet, DetachOutcome::RoomClosed);
        assert!(!waiting.is_finished());

        drop(guard);
        waiting.await.unwrap().unwrap();
        assert_eq!(registry.member_count("busy").await, 2);
    }

    #[tokio::test]
    async fn test_join_replaces_closed_room() {
        let (registry, factory) = registry();
        let (a, _rx_a) = peer(8);
        let a_id = a.id();
        let first = registry.join("doc1", a).await.unwrap();

        // Close the room but leave its table entry behind, as a detach does
        // between discarding the document and removing the entry
        {
            let mut state = first.state.lock().await;
            state.members.remove(&a_id);
            state.doc = None;
            first.closed.store(true, Ordering::Release);
        }
        assert_eq!(registry.room_count().await, 0);
        assert!(!registry.contains("doc1").await);

        let (b, _rx_b) = peer(8);
        let second = registry.join("doc1", b).await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(factory.created.load(Ordering::SeqCst), 2);

        // The departed member is unknown to the replacement
        assert_eq!(registry.detach("doc1", a_id).await, DetachOutcome::NotMember);
        assert!(registry.contains("doc1").await);
    }

    #[tokio::test]
    async fn test_empty_room_never_observable() {
        let (registry, _) = registry();
        let mut joins = Vec::new();
        for _ in 0..16 {
            let registry = registry.clone();
            joins.push(tokio::spawn(async move {
                let (p, _rx) = peer(8);
                let id = p.id();
                registry.join("churn", p).await.unwrap();
                tokio::task::yield_now().await;
                registry.detach("churn", id).await
            }));
        }
        for join in joins {
            join.await.unwrap();
        }

        assert_eq!(registry.room_count().await, 0);
    }
}
