//! Ephemeral presence (cursors, selections, user info) for one room.
//!
//! Updates arrive as Yjs awareness updates: per client id a clock and a
//! JSON state, where `"null"` means the client went away. Presence is
//! never persisted and never touches the document. Entries are keyed by
//! the connection that reported them so a departing connection takes its
//! clients with it.

use std::collections::{BTreeMap, HashMap};
use yrs::block::ClientID;
use yrs::sync::awareness::AwarenessUpdateEntry;

use crate::protocol::{AwarenessUpdate, Message};
use crate::registry::{BroadcastReport, ConnectionId, ConnectionRegistry, Outbound};

/// State JSON marking a removed client.
const NULL_STATE: &str = "null";

fn is_removal(entry: &AwarenessUpdateEntry) -> bool {
    &*entry.json == NULL_STATE
}

/// Presence entries of one room, grouped by reporting connection.
#[derive(Default)]
pub struct Presence {
    by_connection: HashMap<ConnectionId, BTreeMap<ClientID, AwarenessUpdateEntry>>,
}

impl Presence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge an update reported by `origin`. An entry replaces the stored
    /// one when its clock is not older; a `null` state removes the client.
    ///
    /// Returns the number of entries that changed.
    pub fn apply(&mut self, origin: ConnectionId, update: &AwarenessUpdate) -> usize {
        let clients = self.by_connection.entry(origin).or_default();
        let mut changed = 0;
        for (client_id, entry) in &update.clients {
            let newer = clients
                .get(client_id)
                .map_or(true, |current| entry.clock >= current.clock);
            if !newer {
                continue;
            }
            if is_removal(entry) {
                if clients.remove(client_id).is_some() {
                    changed += 1;
                }
            } else {
                clients.insert(*client_id, entry.clone());
                changed += 1;
            }
        }
        if clients.is_empty() {
            self.by_connection.remove(&origin);
        }
        changed
    }

    /// Forget every client reported by `conn`.
    pub fn remove_connection(&mut self, conn: &ConnectionId) -> bool {
        self.by_connection.remove(conn).is_some()
    }

    /// Number of tracked clients across all connections.
    pub fn len(&self) -> usize {
        self.by_connection.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_connection.is_empty()
    }

    /// Awareness update holding every known client, or `None` when nobody
    /// has reported presence. A client id reported through several
    /// connections keeps its highest clock.
    pub fn snapshot(&self) -> Option<AwarenessUpdate> {
        let mut clients: HashMap<ClientID, AwarenessUpdateEntry> = HashMap::new();
        for reported in self.by_connection.values() {
            for (client_id, entry) in reported {
                clients
                    .entry(*client_id)
                    .and_modify(|current| {
                        if entry.clock > current.clock {
                            *current = entry.clone();
                        }
                    })
                    .or_insert_with(|| entry.clone());
            }
        }
        if clients.is_empty() {
            None
        } else {
            Some(AwarenessUpdate { clients })
        }
    }
}

// ─── Relay ────────────────────────────────────────────────────────────

/// Record an awareness update from `origin` and relay the original
/// message bytes to every other connection of the room.
pub fn relay_update(
    presence: &mut Presence,
    connections: &ConnectionRegistry,
    origin: ConnectionId,
    update: &AwarenessUpdate,
    raw: Outbound,
) -> BroadcastReport {
    let changed = presence.apply(origin, update);
    log::trace!(
        "Awareness from {origin}: {} entries, {changed} changed",
        update.clients.len()
    );
    connections.broadcast_except(&origin, &raw)
}

/// Answer a presence query with the current snapshot. Sends nothing when
/// the room has no presence. Returns whether a reply was queued.
pub fn answer_query(
    presence: &Presence,
    connections: &ConnectionRegistry,
    requester: ConnectionId,
) -> bool {
    match presence.snapshot() {
        Some(update) => {
            let reply = Message::awareness(update).encode();
            connections.send_to(&requester, Outbound::new(reply))
        }
        None => false,
    }
}
