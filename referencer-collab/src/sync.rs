//! Two-phase state synchronization and live update relay.
//!
//! Handshake with a new peer:
//! ```text
//!   server ── SyncStep1(server sv) ──► client      (on open)
//!   client ── SyncStep1(client sv) ──► server
//!   server ── SyncStep2(diff)      ──► client
//!   server ── SyncStep1(server sv) ──► client      (ask for what we lack)
//!   client ── SyncStep2(diff)      ──► server      (applied like an update)
//! ```
//! After the handshake only updates flow. Every accepted update is merged
//! into the room document and relayed verbatim to the other peers.

use crate::access::Role;
use crate::document::{Document, DocumentError};
use crate::protocol::{Message, SyncMessage, SyncType};
use crate::registry::{BroadcastReport, ConnectionId, ConnectionRegistry, Outbound};

/// What handling a sync message did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// A state-vector request was answered.
    Answered { queued: usize },
    /// An update was merged and relayed.
    Applied(BroadcastReport),
    /// The sender's role may not write; nothing changed.
    Denied,
}

/// Opening message for a new connection: the room's state vector.
pub fn initial_sync(document: &Document) -> Outbound {
    Outbound::new(Message::sync_step1(document.state_vector()).encode())
}

/// Handle one decoded SYNC message from `origin`.
///
/// `raw` is the message exactly as received; accepted updates are
/// relayed as-is. Errors mean the payload could not be used and nothing
/// was applied or relayed.
pub fn handle_sync(
    document: &Document,
    connections: &ConnectionRegistry,
    origin: ConnectionId,
    role: &Role,
    msg: &SyncMessage,
    raw: &Outbound,
) -> Result<SyncOutcome, DocumentError> {
    match msg {
        SyncMessage::SyncStep1(state_vector) => {
            let diff = document.diff(state_vector);
            let mut queued = 0;
            if connections.send_to(&origin, Outbound::new(Message::sync_step2(diff).encode())) {
                queued += 1;
            }
            if connections.send_to(&origin, initial_sync(document)) {
                queued += 1;
            }
            Ok(SyncOutcome::Answered { queued })
        }
        SyncMessage::SyncStep2(update) | SyncMessage::Update(update) => {
            if !role.can_write() {
                log::info!(
                    "Dropped {} from {role} connection {origin} ({} bytes)",
                    SyncType::of(msg).as_str(),
                    update.len()
                );
                return Ok(SyncOutcome::Denied);
            }
            document.apply_update(update)?;
            Ok(SyncOutcome::Applied(
                connections.broadcast_except(&origin, raw),
            ))
        }
    }
}
