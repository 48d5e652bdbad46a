//! Replicated document held by a room.
//!
//! Thin wrapper over a Yrs `Doc` exposing exactly what the coordinator
//! drives: state vectors, diffs, update application and full-state
//! serialization. Merge semantics (idempotence, commutativity) come from
//! Yrs.
//!
//! Known exposure: Yrs 0.25 decodes update strings without validating
//! UTF-8, and certain malformed updates abort the process inside
//! `Update::decode_v1` instead of returning an error. The same decoder
//! preallocates delete sets from their declared length. Neither can be
//! caught in-process; both go away with a Yrs release that validates
//! update input.

use thiserror::Error;
use yrs::updates::decoder::Decode;
use yrs::{Doc, GetString, ReadTxn, StateVector, Transact, Update};

/// Document errors.
#[derive(Debug, Clone, Error)]
pub enum DocumentError {
    #[error("invalid update: {0}")]
    InvalidUpdate(String),
    #[error("update could not be integrated: {0}")]
    Integration(String),
}

/// The authoritative copy of one collaborative document.
pub struct Document {
    doc: Doc,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    /// Create an empty document.
    pub fn new() -> Self {
        Self { doc: Doc::new() }
    }

    /// Rebuild a document from a blob produced by [`Document::encode_state`].
    pub fn from_state(state: &[u8]) -> Result<Self, DocumentError> {
        let document = Self::new();
        document.apply_update(state)?;
        Ok(document)
    }

    /// State vector ("what I already have").
    pub fn state_vector(&self) -> StateVector {
        self.doc.transact().state_vector()
    }

    /// Minimal update a peer with the given state vector is missing.
    pub fn diff(&self, remote_state_vector: &StateVector) -> Vec<u8> {
        self.doc.transact().encode_diff_v1(remote_state_vector)
    }

    /// Apply an encoded update. Applying the same update twice is a no-op.
    pub fn apply_update(&self, update: &[u8]) -> Result<(), DocumentError> {
        let update =
            Update::decode_v1(update).map_err(|e| DocumentError::InvalidUpdate(e.to_string()))?;
        let mut txn = self.doc.transact_mut();
        txn.apply_update(update)
            .map_err(|e| DocumentError::Integration(e.to_string()))
    }

    /// Serialize the entire document state.
    pub fn encode_state(&self) -> Vec<u8> {
        let txn = self.doc.transact();
        txn.encode_state_as_update_v1(&StateVector::default())
    }

    /// Read a root-level text type, if it exists.
    pub fn text(&self, name: &str) -> Option<String> {
        let txn = self.doc.transact();
        txn.get_text(name).map(|text| text.get_string(&txn))
    }
}
