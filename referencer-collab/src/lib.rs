//! # referencer-collab — Per-document collaboration coordinator
//!
//! The single authority a group of editors connects to in order to
//! exchange a replicated (Yjs-compatible) document, see each other's
//! presence, and have their work durably saved.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   WebSocket   ┌─────────────┐
//! │ Yjs client  │ ◄───────────► │ SyncServer  │
//! │ (per user)  │  lib0 binary  └──────┬──────┘
//! └─────────────┘                      │ (document id, role)
//!                                      ▼
//!                               ┌─────────────┐
//!                               │ Coordinator │  document id → Room
//!                               └──────┬──────┘
//!            ┌──────────────┬──────────┼───────────────┬──────────────┐
//!            ▼              ▼          ▼               ▼              ▼
//!      ┌──────────┐  ┌───────────┐ ┌──────────┐ ┌────────────┐ ┌────────────┐
//!      │ Document │  │ Presence  │ │ Registry │ │ Role gate  │ │ Flush      │
//!      │ (Yrs)    │  │ (relay)   │ │ (fan-out)│ │ (access)   │ │ scheduler  │
//!      └──────────┘  └───────────┘ └──────────┘ └────────────┘ └─────┬──────┘
//!                                                                    ▼
//!                                               fast tier (RocksDB) / slow tier (archive)
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] — lib0 wire envelope decoded into a closed [`Message`] enum
//! - [`document`] — Yrs document wrapper
//! - [`registry`] — live connections and best-effort fan-out
//! - [`access`] — read-only vs. read-write roles
//! - [`sync`] — state-vector handshake and update relay
//! - [`presence`] — awareness relay and snapshots
//! - [`persistence`] — debounced, periodic and final saves
//! - [`storage`] — fast and slow persistence tiers
//! - [`coordinator`] — room lifecycle
//! - [`server`] — WebSocket front end
//! - [`metrics`] — counters
//! - [`config`] — coordinator and server settings

pub mod access;
pub mod config;
pub mod coordinator;
pub mod document;
pub mod metrics;
pub mod persistence;
pub mod presence;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod storage;
pub mod sync;

// Re-exports for convenience
pub use access::Role;
pub use config::{CoordinatorConfig, ServerConfig};
pub use coordinator::{Connection, Coordinator, CoordinatorError};
pub use document::{Document, DocumentError};
pub use metrics::{CoordinatorStats, StatsSnapshot};
pub use persistence::{FlushScheduler, HydrationSource, PersistenceManager};
pub use presence::Presence;
pub use protocol::{AwarenessUpdate, Message, ProtocolError, SyncMessage, SyncType};
pub use registry::{BroadcastReport, ConnectionId, ConnectionRegistry, Outbound};
pub use server::SyncServer;
pub use storage::{
    ArchiveSlowStore, FastStore, MemoryFastStore, MemorySlowStore, PersistenceRecord,
    RocksFastStore, SlowStore, StateMetadata, StoreConfig, StoreError, Tier,
};
pub use sync::SyncOutcome;
