//! Helpers shared by the integration tests: a minimal Yjs-speaking client
//! built on `yrs`, and coordinators over in-memory tiers.

#![allow(dead_code)]

use std::sync::Arc;
use tokio::sync::mpsc;
use yrs::updates::decoder::Decode;
use yrs::{Doc, GetString, ReadTxn, StateVector, Text, Transact, Update};

use referencer_collab::protocol::{Message, SyncMessage};
use referencer_collab::{
    Coordinator, CoordinatorConfig, Document, MemoryFastStore, MemorySlowStore, Outbound,
};

/// Client-side replica speaking the sync protocol.
pub struct TestClient {
    doc: Doc,
}

impl TestClient {
    pub fn new(client_id: u64) -> Self {
        Self {
            doc: Doc::with_client_id(client_id),
        }
    }

    /// Append `chunk` and return the encoded Update message.
    pub fn append(&self, chunk: &str) -> Vec<u8> {
        let text = self.doc.get_or_insert_text("content");
        let before = self.doc.transact().state_vector();
        {
            let mut txn = self.doc.transact_mut();
            let len = text.len(&txn);
            text.insert(&mut txn, len, chunk);
        }
        let diff = self.doc.transact().encode_diff_v1(&before);
        Message::update(diff).encode()
    }

    /// SyncStep1 carrying this replica's state vector.
    pub fn state_request(&self) -> Vec<u8> {
        Message::sync_step1(self.doc.transact().state_vector()).encode()
    }

    /// Process one server message. Returns the reply a Yjs client would
    /// send, if any.
    pub fn receive(&self, bytes: &[u8]) -> Option<Vec<u8>> {
        match Message::decode(bytes).unwrap() {
            Message::Sync(SyncMessage::SyncStep1(sv)) => {
                let diff = self.doc.transact().encode_diff_v1(&sv);
                Some(Message::sync_step2(diff).encode())
            }
            Message::Sync(SyncMessage::SyncStep2(update))
            | Message::Sync(SyncMessage::Update(update)) => {
                let update = Update::decode_v1(&update).unwrap();
                self.doc.transact_mut().apply_update(update).unwrap();
                None
            }
            _ => None,
        }
    }

    pub fn content(&self) -> String {
        let text = self.doc.get_or_insert_text("content");
        let txn = self.doc.transact();
        text.get_string(&txn)
    }
}

/// Everything currently queued for a connection.
pub fn drain(rx: &mut mpsc::Receiver<Outbound>) -> Vec<Vec<u8>> {
    let mut out = Vec::new();
    while let Ok(msg) = rx.try_recv() {
        out.push(msg.to_vec());
    }
    out
}

/// Decoded kinds of everything currently queued.
pub fn drain_messages(rx: &mut mpsc::Receiver<Outbound>) -> Vec<Message> {
    drain(rx)
        .iter()
        .map(|bytes| Message::decode(bytes).unwrap())
        .collect()
}

pub fn memory_coordinator(
    config: CoordinatorConfig,
) -> (Arc<Coordinator>, Arc<MemoryFastStore>, Arc<MemorySlowStore>) {
    let fast = Arc::new(MemoryFastStore::new());
    let slow = Arc::new(MemorySlowStore::new());
    let coordinator = Arc::new(Coordinator::new(config, fast.clone(), slow.clone()));
    (coordinator, fast, slow)
}

/// Text content of an encoded document state.
pub fn content_of(state: &[u8]) -> String {
    Document::from_state(state)
        .unwrap()
        .text("content")
        .unwrap_or_default()
}

/// Encoded document state holding `content`.
pub fn state_with(content: &str) -> Vec<u8> {
    let doc = Doc::with_client_id(999);
    let text = doc.get_or_insert_text("content");
    {
        let mut txn = doc.transact_mut();
        text.insert(&mut txn, 0, content);
    }
    let txn = doc.transact();
    txn.encode_state_as_update_v1(&StateVector::default())
}
