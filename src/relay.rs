//! Room-scoped WebSocket signaling relay

mod actor;
mod envelope;
mod server;
mod types;

pub use actor::{RoomManagerHandle, RoomOptions};
pub use envelope::{Envelope, PEER_LEFT, Relayed};
pub use server::RelayServer;
pub use types::{ConnectionId, OutboundMessage, RelayError, RoomKey, RoomSummary};
