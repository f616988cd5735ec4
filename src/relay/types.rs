use std::collections::HashSet;
use std::fmt;

use rand::Rng;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Utf8Bytes;

/// Relay errors
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("malformed envelope: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("envelope is not a JSON object")]
    NotAnObject,

    #[error("failed to encode relayed frame: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("room actor is no longer running")]
    ActorClosed,
}

const CONN_ID_LEN: usize = 13;
const HEX_CHARS: &[u8] = b"0123456789abcdef";

/// Connection ID: 13-byte fixed array ("conn_" + 8 hex).
///
/// Only used inside the relay for bookkeeping and logs; clients never see it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId {
    bytes: [u8; CONN_ID_LEN],
    len: u8,
}

impl ConnectionId {
    pub fn generate() -> Self {
        let mut bytes = [0u8; CONN_ID_LEN];
        bytes[..5].copy_from_slice(b"conn_");

        let mut rng = rand::rng();
        let value: u32 = rng.random();

        for i in 0..8 {
            let nibble = ((value >> (28 - i * 4)) & 0xF) as usize;
            bytes[5 + i] = HEX_CHARS[nibble];
        }
        Self {
            bytes,
            len: CONN_ID_LEN as u8,
        }
    }

    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.bytes[..self.len as usize]).unwrap_or("")
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Room key. Opaque, chosen by clients, never empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoomKey(String);

impl RoomKey {
    /// Returns `None` for the empty string: a message without a room is not
    /// routed anywhere.
    pub fn new(key: impl Into<String>) -> Option<Self> {
        let key = key.into();
        if key.is_empty() { None } else { Some(Self(key)) }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Wrapper for outbound WebSocket text frames using tungstenite's Utf8Bytes,
/// so one encoded frame can be cloned to every room member in O(1).
#[derive(Debug, Clone)]
pub struct OutboundMessage(Utf8Bytes);

impl OutboundMessage {
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// Get the inner Utf8Bytes for tungstenite Message::Text
    pub fn into_inner(self) -> Utf8Bytes {
        self.0
    }
}

impl From<String> for OutboundMessage {
    fn from(s: String) -> Self {
        Self(Utf8Bytes::from(s))
    }
}

/// Member count of one room at the time of a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomSummary {
    pub room: RoomKey,
    pub members: usize,
}

#[derive(Debug)]
pub(crate) struct ConnectionState {
    /// Channel for outbound frames to this connection. A closed channel means
    /// the connection is no longer open and is skipped on broadcast.
    pub tx: mpsc::UnboundedSender<OutboundMessage>,
    pub rooms: HashSet<RoomKey>,
}

#[derive(Debug, Default)]
pub(crate) struct Room {
    pub members: HashSet<ConnectionId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_and_decode_errors_are_distinct() {
        let json_err = || serde_json::from_str::<u8>("x").unwrap_err();
        let decode = RelayError::from(json_err()).to_string();
        let encode = RelayError::Encode(json_err()).to_string();
        assert!(decode.starts_with("malformed envelope"));
        assert!(encode.starts_with("failed to encode relayed frame"));
    }

    #[test]
    fn connection_id_generate_has_correct_format() {
        let id = ConnectionId::generate();
        assert!(id.as_str().starts_with("conn_"));
        assert_eq!(id.as_str().len(), 13);
        assert!(id.as_str()[5..].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn connection_id_display_matches_as_str() {
        let id = ConnectionId::generate();
        assert_eq!(format!("{}", id), id.as_str());
    }

    #[test]
    fn connection_id_is_copy() {
        let id = ConnectionId::generate();
        let copy = id;
        assert_eq!(id, copy);
    }

    #[test]
    fn room_key_rejects_empty() {
        assert!(RoomKey::new("").is_none());
        assert_eq!(RoomKey::new("x").unwrap().as_str(), "x");
    }

    #[test]
    fn room_key_keeps_long_keys_intact() {
        let long = "room-".repeat(40);
        let key = RoomKey::new(long.clone()).unwrap();
        assert_eq!(key.to_string(), long);
    }

    #[test]
    fn outbound_message_clone_shares_text() {
        let msg = OutboundMessage::from(r#"{"type":"offer"}"#.to_string());
        let copy = msg.clone();
        assert_eq!(copy.as_str(), msg.as_str());
        assert_eq!(msg.into_inner().as_str(), r#"{"type":"offer"}"#);
    }
}
