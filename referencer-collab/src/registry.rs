//! Connection registry and fan-out for one room.
//!
//! Each connection owns a bounded outbound queue drained by its transport
//! task. Sends never block: a full or closed queue counts as a drop and
//! delivery to the remaining peers carries on.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use uuid::Uuid;

use crate::access::Role;

/// Encoded message queued for one connection.
pub type Outbound = Arc<Vec<u8>>;

/// Identity of a live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
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

/// Result of a fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub sent: usize,
    pub dropped: usize,
}

struct Peer {
    role: Role,
    sender: mpsc::Sender<Outbound>,
}

/// Live connections of one room, each tagged with its role.
#[derive(Default)]
pub struct ConnectionRegistry {
    peers: HashMap<ConnectionId, Peer>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: ConnectionId, role: Role, sender: mpsc::Sender<Outbound>) {
        self.peers.insert(id, Peer { role, sender });
    }

    /// Deregister a connection, returning its role if it was present.
    pub fn remove(&mut self, id: &ConnectionId) -> Option<Role> {
        self.peers.remove(id).map(|peer| peer.role)
    }

    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.peers.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Queue a message for one connection. Returns false if it was dropped.
    pub fn send_to(&self, id: &ConnectionId, msg: Outbound) -> bool {
        match self.peers.get(id) {
            Some(peer) => try_deliver(id, &peer.sender, msg),
            None => false,
        }
    }

    /// Queue a message for every connection except `origin`.
    pub fn broadcast_except(&self, origin: &ConnectionId, msg: &Outbound) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        for (id, peer) in &self.peers {
            if id == origin {
                continue;
            }
            if try_deliver(id, &peer.sender, msg.clone()) {
                report.sent += 1;
            } else {
                report.dropped += 1;
            }
        }
        report
    }
}

fn try_deliver(id: &ConnectionId, sender: &mpsc::Sender<Outbound>, msg: Outbound) -> bool {
    match sender.try_send(msg) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            log::warn!("Outbound queue full for connection {id}, message dropped");
            false
        }
        Err(TrySendError::Closed(_)) => {
            log::debug!("Connection {id} already gone, message dropped");
            false
        }
    }
}
