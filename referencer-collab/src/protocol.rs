//! Binary wire protocol spoken by Yjs-compatible clients.
//!
//! Wire format (lib0 variable-length unsigned integers):
//! ```text
//! ┌───────────┬──────────────┬───────────────────────────────┐
//! │ kind      │ sync type    │ payload                       │
//! │ varuint   │ varuint      │ varuint length + bytes        │
//! ├───────────┼──────────────┼───────────────────────────────┤
//! │ 0 SYNC    │ 0 step 1     │ state vector                  │
//! │           │ 1 step 2     │ update                        │
//! │           │ 2 update     │ update                        │
//! │ 1 AWARE   │ -            │ awareness update              │
//! │ 3 QUERY   │ -            │ (empty)                       │
//! └───────────┴──────────────┴───────────────────────────────┘
//! ```
//!
//! The lib0 codec is the one shipped by Yrs (`yrs::sync`). This module
//! narrows it to the closed set of kinds the coordinator serves and
//! rejects entry counts a payload cannot hold before Yrs preallocates for
//! them. Relayed messages are never re-encoded: the room forwards the
//! original bytes.

use thiserror::Error;
use yrs::encoding::read::{self, Cursor, Read};
use yrs::encoding::write::Write;
use yrs::sync::protocol::{MSG_AWARENESS, MSG_QUERY_AWARENESS, MSG_SYNC, MSG_SYNC_STEP_1};
use yrs::updates::decoder::Decode;
use yrs::updates::encoder::{Encode, Encoder, EncoderV1};
use yrs::StateVector;

pub use yrs::sync::{AwarenessUpdate, SyncMessage};

/// Smallest encoding of one state vector entry: client id + clock.
const MIN_STATE_VECTOR_ENTRY: usize = 2;
/// Smallest encoding of one awareness entry: client id + clock + empty string.
const MIN_AWARENESS_ENTRY: usize = 3;

/// Protocol errors.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("empty message")]
    Empty,
    #[error("malformed message: {0}")]
    Malformed(#[from] read::Error),
    #[error("unsupported message kind {0}")]
    UnsupportedKind(u8),
    #[error("payload of {available} bytes cannot hold {declared} entries")]
    DeclaredCount { declared: u64, available: usize },
    #[error("awareness state of client {0} is not valid utf-8")]
    InvalidString(u64),
}

/// Sync sub-type, used for stats and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncType {
    /// Peer announces its state vector
    Step1,
    /// Peer sends what we are missing, in reply to our state vector
    Step2,
    /// Live document mutation
    Update,
}

impl SyncType {
    pub fn of(msg: &SyncMessage) -> Self {
        match msg {
            SyncMessage::SyncStep1(_) => SyncType::Step1,
            SyncMessage::SyncStep2(_) => SyncType::Step2,
            SyncMessage::Update(_) => SyncType::Update,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SyncType::Step1 => "step1",
            SyncType::Step2 => "step2",
            SyncType::Update => "update",
        }
    }
}

/// A decoded protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Sync(SyncMessage),
    Awareness(AwarenessUpdate),
    /// Request for the full presence snapshot.
    QueryAwareness,
}

impl Message {
    /// Build a SyncStep1 message carrying a state vector.
    pub fn sync_step1(state_vector: StateVector) -> Self {
        Message::Sync(SyncMessage::SyncStep1(state_vector))
    }

    /// Build a SyncStep2 message carrying a state diff.
    pub fn sync_step2(diff: Vec<u8>) -> Self {
        Message::Sync(SyncMessage::SyncStep2(diff))
    }

    /// Build an update message.
    pub fn update(update: Vec<u8>) -> Self {
        Message::Sync(SyncMessage::Update(update))
    }

    pub fn awareness(update: AwarenessUpdate) -> Self {
        Message::Awareness(update)
    }

    /// Serialize to the binary wire format.
    pub fn encode(&self) -> Vec<u8> {
        let mut encoder = EncoderV1::new();
        match self {
            Message::Sync(sync) => {
                encoder.write_var(MSG_SYNC);
                sync.encode(&mut encoder);
            }
            Message::Awareness(update) => {
                encoder.write_var(MSG_AWARENESS);
                encoder.write_buf(update.encode_v1());
            }
            Message::QueryAwareness => encoder.write_var(MSG_QUERY_AWARENESS),
        }
        encoder.to_vec()
    }

    /// Deserialize from the binary wire format.
    ///
    /// Bytes after the payload are ignored, matching lib0 decoders. Auth
    /// and custom kinds are not served and fail to decode.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.is_empty() {
            return Err(ProtocolError::Empty);
        }
        check_declared_counts(bytes)?;

        match yrs::sync::Message::decode_v1(bytes)? {
            yrs::sync::Message::Sync(sync) => Ok(Message::Sync(sync)),
            yrs::sync::Message::Awareness(update) => {
                for (client_id, entry) in &update.clients {
                    if std::str::from_utf8(entry.json.as_bytes()).is_err() {
                        return Err(ProtocolError::InvalidString(*client_id));
                    }
                }
                Ok(Message::Awareness(update))
            }
            yrs::sync::Message::AwarenessQuery => Ok(Message::QueryAwareness),
            yrs::sync::Message::Auth(_) => Err(ProtocolError::UnsupportedKind(2)),
            yrs::sync::Message::Custom(kind, _) => Err(ProtocolError::UnsupportedKind(kind)),
        }
    }
}

/// Reject unserved kinds, and state vectors or awareness updates whose
/// leading entry count exceeds what their payload could encode.
fn check_declared_counts(bytes: &[u8]) -> Result<(), ProtocolError> {
    let mut cursor = Cursor::new(bytes);
    let kind: u8 = cursor.read_var()?;
    let (payload, min_entry) = match kind {
        MSG_SYNC => {
            let sync_type: u8 = cursor.read_var()?;
            if sync_type != MSG_SYNC_STEP_1 {
                return Ok(());
            }
            (cursor.read_buf()?, MIN_STATE_VECTOR_ENTRY)
        }
        MSG_AWARENESS => (cursor.read_buf()?, MIN_AWARENESS_ENTRY),
        MSG_QUERY_AWARENESS => return Ok(()),
        other => return Err(ProtocolError::UnsupportedKind(other)),
    };

    let declared: u64 = Cursor::new(payload).read_var()?;
    let available = payload.len();
    if declared > (available / min_entry) as u64 {
        return Err(ProtocolError::DeclaredCount {
            declared,
            available,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use yrs::sync::awareness::AwarenessUpdateEntry;

    fn awareness(client_id: u64, clock: u32, json: &str) -> AwarenessUpdate {
        AwarenessUpdate {
            clients: HashMap::from([(
                client_id,
                AwarenessUpdateEntry {
                    clock,
                    json: json.into(),
                },
            )]),
        }
    }

    #[test]
    fn test_sync_step1_wire_layout() {
        let msg = Message::sync_step1(StateVector::default());
        assert_eq!(msg.encode(), vec![0, 0, 1, 0]);
    }

    #[test]
    fn test_update_decode() {
        let msg = Message::decode(&[0, 2, 3, 7, 8, 9]).unwrap();
        assert_eq!(msg, Message::update(vec![7, 8, 9]));
    }

    #[test]
    fn test_sync_step2_decode() {
        let msg = Message::decode(&[0, 1, 2, 5, 6]).unwrap();
        match msg {
            Message::Sync(sync) => {
                assert_eq!(SyncType::of(&sync), SyncType::Step2);
                assert_eq!(sync, SyncMessage::SyncStep2(vec![5, 6]));
            }
            other => panic!("expected sync message, got {other:?}"),
        }
    }

    #[test]
    fn test_awareness_wire_layout() {
        let encoded = Message::awareness(awareness(5, 1, "{}")).encode();
        assert_eq!(encoded, vec![1, 6, 1, 5, 1, 2, b'{', b'}']);
        assert_eq!(
            Message::decode(&encoded).unwrap(),
            Message::Awareness(awareness(5, 1, "{}"))
        );
    }

    #[test]
    fn test_query_awareness() {
        assert_eq!(Message::QueryAwareness.encode(), vec![3]);
        assert_eq!(Message::decode(&[3]).unwrap(), Message::QueryAwareness);
    }

    #[test]
    fn test_decode_empty() {
        assert!(matches!(Message::decode(&[]), Err(ProtocolError::Empty)));
    }

    #[test]
    fn test_decode_auth_kind_rejected() {
        assert!(matches!(
            Message::decode(&[2, 1]),
            Err(ProtocolError::UnsupportedKind(2))
        ));
    }

    #[test]
    fn test_decode_custom_kind_rejected() {
        assert!(matches!(
            Message::decode(&[9, 1, 0]),
            Err(ProtocolError::UnsupportedKind(9))
        ));
    }

    #[test]
    fn test_decode_unknown_sync_type() {
        assert!(matches!(
            Message::decode(&[0, 9, 0]),
            Err(ProtocolError::Malformed(_))
        ));
    }

    #[test]
    fn test_decode_truncated_payload() {
        // Claims 10 payload bytes, carries 2
        assert!(matches!(
            Message::decode(&[0, 2, 10, 1, 2]),
            Err(ProtocolError::Malformed(_))
        ));
    }

    #[test]
    fn test_decode_ignores_trailing_bytes() {
        let msg = Message::decode(&[0, 2, 1, 42, 99, 99]).unwrap();
        assert_eq!(msg, Message::update(vec![42]));
    }

    #[test]
    fn test_huge_awareness_count_rejected_before_decoding() {
        // Awareness payload announcing u64::MAX entries in 10 bytes
        let mut payload = vec![0xFF; 9];
        payload.push(0x01);
        let mut bytes = vec![1, payload.len() as u8];
        bytes.extend_from_slice(&payload);

        assert!(matches!(
            Message::decode(&bytes),
            Err(ProtocolError::DeclaredCount { declared: u64::MAX, available: 10 })
        ));
    }

    #[test]
    fn test_huge_state_vector_count_rejected_before_decoding() {
        // SyncStep1 whose state vector announces 2^32 - 1 clients
        let bytes = vec![0, 0, 5, 0xFF, 0xFF, 0xFF, 0xFF, 0x0F];
        assert!(matches!(
            Message::decode(&bytes),
            Err(ProtocolError::DeclaredCount { .. })
        ));
    }

    #[test]
    fn test_truncated_awareness_update() {
        // Announces two entries, carries one
        let mut payload = awareness(1, 1, "{}").encode_v1();
        payload[0] = 2;
        let mut bytes = vec![1, payload.len() as u8];
        bytes.extend_from_slice(&payload);
        assert!(Message::decode(&bytes).is_err());
    }

    #[test]
    fn test_awareness_invalid_utf8_rejected() {
        // One entry: client 7, clock 1, 2-byte state that is not utf-8
        let payload = vec![1, 7, 1, 2, 0xC3, 0x28];
        let mut bytes = vec![1, payload.len() as u8];
        bytes.extend_from_slice(&payload);
        assert!(matches!(
            Message::decode(&bytes),
            Err(ProtocolError::InvalidString(7))
        ));
    }

    #[test]
    fn test_large_update_length_prefix() {
        let payload = vec![42u8; 65536];
        let encoded = Message::update(payload.clone()).encode();
        // kind + sub-type + 3-byte length prefix
        assert_eq!(encoded.len(), 2 + 3 + payload.len());
        assert_eq!(Message::decode(&encoded).unwrap(), Message::update(payload));
    }
}
