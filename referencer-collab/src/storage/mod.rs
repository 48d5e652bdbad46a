//! Persistence tiers for collaborative documents.
//!
//! Architecture:
//! ```text
//! ┌─────────────┐  debounced save  ┌──────────────────────┐
//! │ Room        │ ───────────────► │ FastStore            │
//! │ (in-memory) │                  │ RocksDB, ≤128 KiB    │
//! └──────┬──────┘                  └──────────────────────┘
//!        │ periodic / oversize / final
//!        ▼
//! ┌──────────────────────┐
//! │ SlowStore            │
//! │ JSON archive, base64 │
//! └──────────────────────┘
//! ```
//!
//! Both traits are synchronous; the persistence manager calls them from
//! `spawn_blocking` so the async runtime never waits on disk.

pub mod archive;
pub mod memory;
pub mod rocks;

use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use thiserror::Error;

pub use archive::ArchiveSlowStore;
pub use memory::{MemoryFastStore, MemorySlowStore};
pub use rocks::{RocksFastStore, StateMetadata, StoreConfig};

/// Entry name of the serialized document inside a document's fast-tier namespace.
pub const DOC_STATE_KEY: &str = "doc-state";

/// Storage errors.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),
    #[error("I/O error: {0}")]
    Io(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("deserialization error: {0}")]
    Deserialization(String),
    #[error("compression error: {0}")]
    Compression(String),
    #[error("storage task failed: {0}")]
    Task(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl From<rocksdb::Error> for StoreError {
    fn from(e: rocksdb::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Io(e.to_string())
    }
}

/// Which persistence tier an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    Fast,
    Slow,
}

impl Tier {
    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Fast => "fast",
            Tier::Slow => "slow",
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable copy of a document at a point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistenceRecord {
    pub document_id: String,
    #[serde(with = "base64_bytes")]
    pub state: Vec<u8>,
    /// Seconds since the unix epoch
    pub updated_at: u64,
}

impl PersistenceRecord {
    /// Stamp a record with the current time.
    pub fn new(document_id: impl Into<String>, state: Vec<u8>) -> Self {
        Self {
            document_id: document_id.into(),
            state,
            updated_at: unix_now(),
        }
    }
}

/// Low-latency, size-limited tier.
///
/// Callers enforce the size ceiling; implementations store whatever they get.
pub trait FastStore: Send + Sync {
    fn load(&self, document_id: &str) -> Result<Option<Vec<u8>>, StoreError>;
    fn save(&self, document_id: &str, state: &[u8]) -> Result<(), StoreError>;
}

/// Unbounded, higher-latency tier with upsert semantics on `document_id`.
pub trait SlowStore: Send + Sync {
    fn load(&self, document_id: &str) -> Result<Option<PersistenceRecord>, StoreError>;
    fn upsert(&self, record: &PersistenceRecord) -> Result<(), StoreError>;
}

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}
