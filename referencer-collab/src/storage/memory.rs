//! In-process tiers for tests and the in-memory server mode.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use super::{FastStore, PersistenceRecord, SlowStore, StoreError};

#[derive(Default)]
struct Counters {
    loads: AtomicUsize,
    saves: AtomicUsize,
    failing: AtomicBool,
}

impl Counters {
    fn check(&self, tier: &str) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable(format!("{tier} tier set to fail")))
        } else {
            Ok(())
        }
    }
}

/// Fast tier held in a `HashMap`.
#[derive(Default)]
pub struct MemoryFastStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
    counters: Counters,
}

impl MemoryFastStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Successful `save` calls so far.
    pub fn save_count(&self) -> usize {
        self.counters.saves.load(Ordering::SeqCst)
    }

    /// `load` calls so far, successful or not.
    pub fn load_count(&self) -> usize {
        self.counters.loads.load(Ordering::SeqCst)
    }

    /// Make every subsequent call fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.counters.failing.store(failing, Ordering::SeqCst);
    }

    /// Current stored state, bypassing counters.
    pub fn get(&self, document_id: &str) -> Option<Vec<u8>> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(document_id)
            .cloned()
    }

    /// Seed a state, bypassing counters.
    pub fn insert(&self, document_id: &str, state: Vec<u8>) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(document_id.to_string(), state);
    }
}

impl FastStore for MemoryFastStore {
    fn load(&self, document_id: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.counters.loads.fetch_add(1, Ordering::SeqCst);
        self.counters.check("fast")?;
        Ok(self.get(document_id))
    }

    fn save(&self, document_id: &str, state: &[u8]) -> Result<(), StoreError> {
        self.counters.check("fast")?;
        self.insert(document_id, state.to_vec());
        self.counters.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Slow tier held in a `HashMap`.
#[derive(Default)]
pub struct MemorySlowStore {
    records: Mutex<HashMap<String, PersistenceRecord>>,
    counters: Counters,
}

impl MemorySlowStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn save_count(&self) -> usize {
        self.counters.saves.load(Ordering::SeqCst)
    }

    pub fn load_count(&self) -> usize {
        self.counters.loads.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, failing: bool) {
        self.counters.failing.store(failing, Ordering::SeqCst);
    }

    pub fn get(&self, document_id: &str) -> Option<PersistenceRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(document_id)
            .cloned()
    }

    pub fn insert(&self, record: PersistenceRecord) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(record.document_id.clone(), record);
    }
}

impl SlowStore for MemorySlowStore {
    fn load(&self, document_id: &str) -> Result<Option<PersistenceRecord>, StoreError> {
        self.counters.loads.fetch_add(1, Ordering::SeqCst);
        self.counters.check("slow")?;
        Ok(self.get(document_id))
    }

    fn upsert(&self, record: &PersistenceRecord) -> Result<(), StoreError> {
        self.counters.check("slow")?;
        self.insert(record.clone());
        self.counters.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
