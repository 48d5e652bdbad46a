//! Room lifecycle: one resident room per document id.
//!
//! ```text
//! Coordinator
//!   └── rooms: document id → Room        (create-or-fetch under one mutex)
//!         └── Mutex<RoomState>           (every message handled one at a time)
//!               ├── Document
//!               ├── Presence
//!               ├── ConnectionRegistry
//!               └── FlushScheduler       (debounce + periodic timers)
//! ```
//!
//! A room is hydrated by its first connection and torn down when its last
//! connection closes: the scheduler is stopped (waiting out any in-flight
//! save), a final fast + slow flush runs, and the room leaves the map.
//! A connection arriving for a room mid-teardown waits for it to finish
//! and then gets a fresh room hydrated from what was just flushed.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, watch, Mutex, MutexGuard};

use crate::access::Role;
use crate::config::CoordinatorConfig;
use crate::document::Document;
use crate::metrics::{CoordinatorStats, StatsSnapshot};
use crate::persistence::{FlushScheduler, PersistenceManager, SnapshotSource};
use crate::presence::{self, Presence};
use crate::protocol::{Message, SyncType};
use crate::registry::{ConnectionId, ConnectionRegistry, Outbound};
use crate::storage::{FastStore, SlowStore};
use crate::sync::{self, SyncOutcome};

/// Errors surfaced to whoever is establishing a connection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoordinatorError {
    #[error("document id must not be empty")]
    EmptyDocumentId,
    #[error("coordinator is shut down")]
    ShutDown,
}

// ─── Room ─────────────────────────────────────────────────────────────

struct RoomState {
    document: Document,
    presence: Presence,
    connections: ConnectionRegistry,
    scheduler: Option<FlushScheduler>,
    /// Document was loaded from storage; only hydrated rooms are flushed.
    hydrated: bool,
    /// Teardown has started; no message or connection is accepted.
    closed: bool,
}

struct Room {
    document_id: Arc<str>,
    state: Mutex<RoomState>,
    torn_down: watch::Sender<bool>,
}

impl Room {
    fn new(document_id: Arc<str>) -> Self {
        let (torn_down, _) = watch::channel(false);
        Self {
            document_id,
            state: Mutex::new(RoomState {
                document: Document::new(),
                presence: Presence::new(),
                connections: ConnectionRegistry::new(),
                scheduler: None,
                hydrated: false,
                closed: false,
            }),
            torn_down,
        }
    }

    async fn wait_torn_down(&self) {
        let mut rx = self.torn_down.subscribe();
        let _ = rx.wait_for(|done| *done).await;
    }
}

impl SnapshotSource for Room {
    fn snapshot(&self) -> impl Future<Output = Option<Vec<u8>>> + Send {
        async move {
            let state = self.state.lock().await;
            if state.closed || !state.hydrated {
                None
            } else {
                Some(state.document.encode_state())
            }
        }
    }
}

// ─── Connection ───────────────────────────────────────────────────────

/// A live connection to one room, handed to the transport layer.
#[derive(Clone)]
pub struct Connection {
    id: ConnectionId,
    document_id: Arc<str>,
    role: Role,
    room: Arc<Room>,
}

impl Connection {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn document_id(&self) -> &str {
        &self.document_id
    }

    pub fn role(&self) -> &Role {
        &self.role
    }

    pub fn can_write(&self) -> bool {
        self.role.can_write()
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("document_id", &self.document_id)
            .field("role", &self.role)
            .finish()
    }
}

// ─── Coordinator ──────────────────────────────────────────────────────

/// Owns every resident room and routes connection events to them.
pub struct Coordinator {
    config: CoordinatorConfig,
    rooms: Mutex<HashMap<Arc<str>, Arc<Room>>>,
    persistence: PersistenceManager,
    stats: Arc<CoordinatorStats>,
    accepting: AtomicBool,
}

impl Coordinator {
    pub fn new(config: CoordinatorConfig, fast: Arc<dyn FastStore>, slow: Arc<dyn SlowStore>) -> Self {
        let config = config.validated();
        let stats = Arc::new(CoordinatorStats::new());
        let persistence = PersistenceManager::new(fast, slow, config.fast_tier_limit, stats.clone());
        Self {
            config,
            rooms: Mutex::new(HashMap::new()),
            persistence,
            stats,
            accepting: AtomicBool::new(true),
        }
    }

    /// Join `document_id` with an already-authorized role.
    ///
    /// Hydrates the room on first use, registers the connection and queues
    /// the opening SyncStep1. The receiver yields every message addressed
    /// to this connection.
    pub async fn open_connection(
        &self,
        document_id: &str,
        role: Role,
    ) -> Result<(Connection, mpsc::Receiver<Outbound>), CoordinatorError> {
        if document_id.is_empty() {
            return Err(CoordinatorError::EmptyDocumentId);
        }

        loop {
            let room = self.room_for(document_id).await?;
            let mut state = room.state.lock().await;
            if state.closed {
                drop(state);
                room.wait_torn_down().await;
                continue;
            }

            if !state.hydrated {
                let (document, source) = self.persistence.hydrate(document_id).await;
                state.document = document;
                state.scheduler = Some(FlushScheduler::spawn(
                    room.document_id.clone(),
                    Arc::downgrade(&room),
                    self.persistence.clone(),
                    self.config.debounce,
                    self.config.flush_interval,
                ));
                state.hydrated = true;
                log::info!("Room {document_id} resident (hydrated from {source:?})");
            }

            let id = ConnectionId::new();
            let (tx, rx) = mpsc::channel(self.config.outbound_capacity);
            state.connections.insert(id, role.clone(), tx);
            state.connections.send_to(&id, sync::initial_sync(&state.document));
            self.stats.connection_opened();
            log::info!(
                "Connection {id} opened on doc {document_id} as {role} ({} in room)",
                state.connections.len()
            );
            drop(state);

            let connection = Connection {
                id,
                document_id: room.document_id.clone(),
                role,
                room,
            };
            return Ok((connection, rx));
        }
    }

    /// Handle one binary message from `conn`. Never fails: undecodable
    /// input and rejected writes are logged and counted.
    pub async fn on_message(&self, conn: &Connection, bytes: &[u8]) {
        let mut state = conn.room.state.lock().await;
        if state.closed || !state.connections.contains(&conn.id) {
            log::debug!("Ignoring message from detached connection {}", conn.id);
            return;
        }

        let message = match Message::decode(bytes) {
            Ok(message) => message,
            Err(e) => {
                log::warn!(
                    "Decode error on doc {} from {} ({} bytes): {e}",
                    conn.document_id,
                    conn.id,
                    bytes.len()
                );
                self.stats.decode_error();
                return;
            }
        };

        match message {
            Message::Sync(msg) => {
                let sync_type = SyncType::of(&msg);
                self.stats.sync_message(sync_type, bytes.len());
                let raw = Outbound::new(bytes.to_vec());
                let result =
                    sync::handle_sync(&state.document, &state.connections, conn.id, &conn.role, &msg, &raw);
                match result {
                    Ok(SyncOutcome::Applied(report)) => {
                        self.stats.broadcast(report.sent, report.dropped);
                        if let Some(scheduler) = &state.scheduler {
                            scheduler.notify_mutation();
                        }
                    }
                    Ok(SyncOutcome::Denied) => self.stats.write_denied(),
                    Ok(SyncOutcome::Answered { .. }) => {}
                    Err(e) => {
                        log::warn!(
                            "Rejected {} on doc {} from {} ({} bytes): {e}",
                            sync_type.as_str(),
                            conn.document_id,
                            conn.id,
                            bytes.len()
                        );
                        self.stats.decode_error();
                    }
                }
            }
            Message::Awareness(update) => {
                self.stats.awareness_message();
                let RoomState {
                    presence,
                    connections,
                    ..
                } = &mut *state;
                let raw = Outbound::new(bytes.to_vec());
                let report = presence::relay_update(presence, connections, conn.id, &update, raw);
                self.stats.broadcast(report.sent, report.dropped);
            }
            Message::QueryAwareness => {
                presence::answer_query(&state.presence, &state.connections, conn.id);
            }
        }
    }

    /// Deregister `conn`. The last connection out tears the room down.
    /// Calling this twice for one connection is harmless.
    pub async fn on_close(&self, conn: &Connection) {
        let room = conn.room.clone();
        let mut state = room.state.lock().await;
        if state.connections.remove(&conn.id).is_none() {
            return;
        }
        state.presence.remove_connection(&conn.id);
        self.stats.connection_closed();
        log::info!(
            "Connection {} closed on doc {} ({} left)",
            conn.id,
            conn.document_id,
            state.connections.len()
        );

        if state.connections.is_empty() && !state.closed {
            self.teardown(&room, state).await;
        }
    }

    /// Flush and release every resident room, then refuse new connections.
    pub async fn shutdown(&self) {
        let rooms: Vec<Arc<Room>> = {
            let rooms = self.rooms.lock().await;
            self.accepting.store(false, Ordering::SeqCst);
            rooms.values().cloned().collect()
        };
        log::info!("Shutting down coordinator, flushing {} rooms", rooms.len());

        for room in rooms {
            let state = room.state.lock().await;
            if state.closed {
                drop(state);
                room.wait_torn_down().await;
            } else {
                self.teardown(&room, state).await;
            }
        }
    }

    // ── inspection ──

    pub async fn room_count(&self) -> usize {
        self.rooms.lock().await.len()
    }

    /// Live connections in a resident room; 0 if the room is not resident.
    pub async fn connection_count(&self, document_id: &str) -> usize {
        let Some(room) = self.resident(document_id).await else {
            return 0;
        };
        let state = room.state.lock().await;
        if state.closed {
            0
        } else {
            state.connections.len()
        }
    }

    /// Full encoded state of a resident room.
    pub async fn document_state(&self, document_id: &str) -> Option<Vec<u8>> {
        let room = self.resident(document_id).await?;
        room.snapshot().await
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    // ── internals ──

    async fn room_for(&self, document_id: &str) -> Result<Arc<Room>, CoordinatorError> {
        let mut rooms = self.rooms.lock().await;
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(CoordinatorError::ShutDown);
        }
        if let Some(room) = rooms.get(document_id) {
            return Ok(room.clone());
        }
        let id: Arc<str> = Arc::from(document_id);
        let room = Arc::new(Room::new(id.clone()));
        rooms.insert(id, room.clone());
        self.stats.room_created();
        log::debug!("Created room {document_id}");
        Ok(room)
    }

    async fn resident(&self, document_id: &str) -> Option<Arc<Room>> {
        self.rooms.lock().await.get(document_id).cloned()
    }

    /// Stop the scheduler, run the final flush, and drop the room.
    async fn teardown(&self, room: &Arc<Room>, mut state: MutexGuard<'_, RoomState>) {
        state.closed = true;
        let scheduler = state.scheduler.take();
        // Unblock the scheduler, which may be waiting on this lock for a snapshot
        drop(state);
        if let Some(scheduler) = scheduler {
            scheduler.shutdown().await;
        }

        let final_state = {
            let mut state = room.state.lock().await;
            // Live connections only remain here on shutdown; dropping their
            // senders ends their outbound streams.
            let remaining = std::mem::take(&mut state.connections);
            if !remaining.is_empty() {
                log::info!(
                    "Detaching {} connections from doc {}",
                    remaining.len(),
                    room.document_id
                );
            }
            state.presence = Presence::new();
            if state.hydrated {
                let encoded = state.document.encode_state();
                state.document = Document::new();
                Some(encoded)
            } else {
                None
            }
        };

        if let Some(encoded) = final_state {
            let size = encoded.len();
            match self.persistence.flush_now(&room.document_id, encoded).await {
                Ok(()) => log::info!("Final flush of doc {} ({size} bytes)", room.document_id),
                Err(e) => log::error!("Final flush of doc {} incomplete: {e}", room.document_id),
            }
        }

        {
            let mut rooms = self.rooms.lock().await;
            if rooms
                .get(&room.document_id)
                .is_some_and(|resident| Arc::ptr_eq(resident, room))
            {
                rooms.remove(&room.document_id);
            }
        }
        self.stats.room_destroyed();
        room.torn_down.send_replace(true);
        log::info!("Room {} torn down", room.document_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryFastStore, MemorySlowStore};
    use std::time::Duration;
    use yrs::{ReadTxn, StateVector, Text, Transact, WriteTxn};

    fn coordinator() -> (Coordinator, Arc<MemoryFastStore>, Arc<MemorySlowStore>) {
        let fast = Arc::new(MemoryFastStore::new());
        let slow = Arc::new(MemorySlowStore::new());
        let coordinator = Coordinator::new(CoordinatorConfig::for_testing(), fast.clone(), slow.clone());
        (coordinator, fast, slow)
    }

    fn update_message(client_id: u64, content: &str) -> Vec<u8> {
        let doc = yrs::Doc::with_client_id(client_id);
        {
            let mut txn = doc.transact_mut();
            let text = txn.get_or_insert_text("content");
            text.insert(&mut txn, 0, content);
        }
        let txn = doc.transact();
        Message::update(txn.encode_state_as_update_v1(&StateVector::default())).encode()
    }

    fn content(state: &[u8]) -> Option<String> {
        Document::from_state(state).unwrap().text("content")
    }

    #[tokio::test]
    async fn test_out_of_range_timers_do_not_panic() {
        let fast = Arc::new(MemoryFastStore::new());
        let slow = Arc::new(MemorySlowStore::new());
        let config = CoordinatorConfig {
            debounce: Duration::MAX,
            flush_interval: Duration::ZERO,
            outbound_capacity: 0,
            ..CoordinatorConfig::for_testing()
        };
        let coordinator = Coordinator::new(config, fast.clone(), slow.clone());

        let (conn, mut rx) = coordinator.open_connection("doc", Role::Editor).await.unwrap();
        assert!(rx.recv().await.is_some());
        coordinator.on_message(&conn, &update_message(1, "still here")).await;
        coordinator.on_close(&conn).await;

        assert_eq!(content(&fast.get("doc").unwrap()).as_deref(), Some("still here"));
        assert_eq!(coordinator.room_count().await, 0);
    }

    #[tokio::test]
    async fn test_open_sends_step1() {
        let (coordinator, _, _) = coordinator();
        let (conn, mut rx) = coordinator.open_connection("doc", Role::Viewer).await.unwrap();

        let first = Message::decode(&rx.recv().await.unwrap()).unwrap();
        assert!(matches!(first, Message::Sync(crate::protocol::SyncMessage::SyncStep1(_))));
        assert_eq!(conn.document_id(), "doc");
        assert!(!conn.can_write());
        assert_eq!(coordinator.room_count().await, 1);
        assert_eq!(coordinator.connection_count("doc").await, 1);
    }

    #[tokio::test]
    async fn test_empty_document_id_refused() {
        let (coordinator, _, _) = coordinator();
        let result = coordinator.open_connection("", Role::Editor).await;
        assert!(matches!(result, Err(CoordinatorError::EmptyDocumentId)));
    }

    #[tokio::test]
    async fn test_rooms_are_isolated() {
        let (coordinator, _, _) = coordinator();
        let (a, _rx_a) = coordinator.open_connection("a", Role::Editor).await.unwrap();
        let (_b, mut rx_b) = coordinator.open_connection("b", Role::Editor).await.unwrap();
        rx_b.recv().await.unwrap();

        coordinator.on_message(&a, &update_message(1, "only in a")).await;
        assert!(rx_b.try_recv().is_err());
        assert_eq!(coordinator.document_state("b").await.map(|s| content(&s)), Some(None));
        assert_eq!(
            content(&coordinator.document_state("a").await.unwrap()).as_deref(),
            Some("only in a")
        );
    }

    #[tokio::test]
    async fn test_decode_error_keeps_connection() {
        let (coordinator, _, _) = coordinator();
        let (conn, _rx) = coordinator.open_connection("doc", Role::Editor).await.unwrap();

        coordinator.on_message(&conn, &[]).await;
        coordinator.on_message(&conn, &[2, 0]).await;
        coordinator.on_message(&conn, &[0, 2, 200]).await;
        assert_eq!(coordinator.stats().decode_errors, 3);

        coordinator.on_message(&conn, &update_message(1, "still here")).await;
        assert_eq!(
            content(&coordinator.document_state("doc").await.unwrap()).as_deref(),
            Some("still here")
        );
    }

    #[tokio::test]
    async fn test_denied_write_counted() {
        let (coordinator, _, _) = coordinator();
        let (viewer, _rx) = coordinator.open_connection("doc", Role::Viewer).await.unwrap();
        coordinator.on_message(&viewer, &update_message(1, "nope")).await;

        assert_eq!(coordinator.stats().writes_denied, 1);
        assert_eq!(content(&coordinator.document_state("doc").await.unwrap()), None);
    }

    #[tokio::test]
    async fn test_last_close_flushes_and_releases() {
        let (coordinator, fast, slow) = coordinator();
        let (conn, _rx) = coordinator.open_connection("doc", Role::Editor).await.unwrap();
        coordinator.on_message(&conn, &update_message(1, "keep me")).await;

        coordinator.on_close(&conn).await;
        assert_eq!(coordinator.room_count().await, 0);
        assert_eq!(content(&fast.get("doc").unwrap()).as_deref(), Some("keep me"));
        assert_eq!(content(&slow.get("doc").unwrap().state).as_deref(), Some("keep me"));

        let stats = coordinator.stats();
        assert_eq!(stats.active_rooms, 0);
        assert_eq!(stats.connections_closed, 1);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (coordinator, _, slow) = coordinator();
        let (conn, _rx) = coordinator.open_connection("doc", Role::Editor).await.unwrap();
        coordinator.on_close(&conn).await;
        coordinator.on_close(&conn).await;
        assert_eq!(slow.save_count(), 1);
        assert_eq!(coordinator.stats().connections_closed, 1);
    }

    #[tokio::test]
    async fn test_message_after_close_ignored() {
        let (coordinator, _, _) = coordinator();
        let (a, _rx_a) = coordinator.open_connection("doc", Role::Editor).await.unwrap();
        let (_b, _rx_b) = coordinator.open_connection("doc", Role::Editor).await.unwrap();
        coordinator.on_close(&a).await;

        coordinator.on_message(&a, &update_message(1, "ghost")).await;
        assert_eq!(content(&coordinator.document_state("doc").await.unwrap()), None);
    }

    #[tokio::test]
    async fn test_unhydrated_room_never_overwrites_storage() {
        let (coordinator, fast, slow) = coordinator();
        // Registered but never joined, as if shutdown raced the first opener
        coordinator.room_for("doc").await.unwrap();
        assert_eq!(coordinator.room_count().await, 1);

        coordinator.shutdown().await;
        assert_eq!(coordinator.room_count().await, 0);
        assert_eq!(fast.save_count(), 0);
        assert_eq!(slow.save_count(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_flushes_and_refuses() {
        let (coordinator, fast, slow) = coordinator();
        let (conn, mut rx) = coordinator.open_connection("doc", Role::Editor).await.unwrap();
        coordinator.on_message(&conn, &update_message(1, "final words")).await;

        coordinator.shutdown().await;
        assert_eq!(coordinator.room_count().await, 0);
        assert_eq!(content(&fast.get("doc").unwrap()).as_deref(), Some("final words"));
        assert_eq!(slow.save_count(), 1);

        // Outbound stream ends once the room lets go of the sender
        while rx.recv().await.is_some() {}

        let refused = coordinator.open_connection("doc", Role::Editor).await;
        assert!(matches!(refused, Err(CoordinatorError::ShutDown)));

        // The transport still reports the close afterwards
        coordinator.on_close(&conn).await;
    }

    #[tokio::test]
    async fn test_debounced_save_after_mutation() {
        let (coordinator, fast, _) = coordinator();
        let (conn, _rx) = coordinator.open_connection("doc", Role::Editor).await.unwrap();
        for i in 0..5 {
            coordinator.on_message(&conn, &update_message(i + 1, "x")).await;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(fast.save_count(), 1);
        assert_eq!(coordinator.stats().fast_saves, 1);
    }
}
