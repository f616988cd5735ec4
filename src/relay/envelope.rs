use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use super::types::{OutboundMessage, RelayError, RoomKey};

/// Frame type sent to the remaining room members when `announce_leave` is on.
pub const PEER_LEFT: &str = "peer-left";

/// Message sent from a client to the relay.
///
/// `payload` is kept as raw JSON text and never inspected.
#[derive(Debug, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    pub room: Option<String>,

    #[serde(rename = "type")]
    pub kind: String,

    #[serde(default)]
    pub payload: Option<Box<RawValue>>,
}

impl Envelope {
    pub fn parse(text: &str) -> Result<Self, RelayError> {
        // serde also accepts a struct in sequence form; envelopes are objects only.
        if !text.trim_start().starts_with('{') {
            return Err(RelayError::NotAnObject);
        }
        Ok(serde_json::from_str(text)?)
    }

    /// The room this envelope is addressed to, if any.
    pub fn room_key(&self) -> Option<RoomKey> {
        self.room.as_deref().and_then(RoomKey::new)
    }

    /// Encode the frame forwarded to the other room members.
    pub fn relayed(&self) -> Result<OutboundMessage, RelayError> {
        Relayed {
            kind: &self.kind,
            payload: self.payload.as_deref(),
        }
        .encode()
    }
}

/// Message sent from the relay to a room member. The room is not repeated.
#[derive(Debug, Serialize)]
pub struct Relayed<'a> {
    #[serde(rename = "type")]
    pub kind: &'a str,
    pub payload: Option<&'a RawValue>,
}

impl Relayed<'_> {
    pub fn encode(&self) -> Result<OutboundMessage, RelayError> {
        serde_json::to_string(self)
            .map(OutboundMessage::from)
            .map_err(RelayError::Encode)
    }

    pub fn peer_left() -> Self {
        Relayed {
            kind: PEER_LEFT,
            payload: None,
        }
    }
}
