use std::collections::{HashMap, HashSet};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use super::envelope::Relayed;
use super::types::{
    ConnectionId, ConnectionState, OutboundMessage, RelayError, Room, RoomKey, RoomSummary,
};

/// Commands sent to the room manager actor
pub(crate) enum RoomCommand {
    Connect {
        tx: mpsc::UnboundedSender<OutboundMessage>,
        reply: oneshot::Sender<ConnectionId>,
    },
    Relay {
        conn: ConnectionId,
        room: RoomKey,
        msg: OutboundMessage,
        reply: oneshot::Sender<usize>,
    },
    Disconnect {
        conn: ConnectionId,
    },
    Snapshot {
        reply: oneshot::Sender<Vec<RoomSummary>>,
    },
    #[cfg(test)]
    RoomsOf {
        conn: ConnectionId,
        reply: oneshot::Sender<Vec<RoomKey>>,
    },
}

/// Options for the room table owned by the actor.
#[derive(Debug, Clone, Copy, Default)]
pub struct RoomOptions {
    /// Send a `peer-left` frame to the members that remain after a disconnect.
    pub announce_leave: bool,
}

struct RoomTable {
    options: RoomOptions,
    rooms: HashMap<RoomKey, Room>,
    conns: HashMap<ConnectionId, ConnectionState>,
}

impl RoomTable {
    fn new(options: RoomOptions) -> Self {
        Self {
            options,
            rooms: HashMap::new(),
            conns: HashMap::new(),
        }
    }

    fn connect(&mut self, tx: mpsc::UnboundedSender<OutboundMessage>) -> ConnectionId {
        let mut conn = ConnectionId::generate();
        while self.conns.contains_key(&conn) {
            conn = ConnectionId::generate();
        }
        self.conns.insert(
            conn,
            ConnectionState {
                tx,
                rooms: HashSet::new(),
            },
        );
        conn
    }

    /// Add `conn` to `room` and forward `msg` to every other member.
    /// Returns how many members the frame was handed to.
    fn relay(&mut self, conn: ConnectionId, room: RoomKey, msg: OutboundMessage) -> usize {
        let Some(state) = self.conns.get_mut(&conn) else {
            debug!("Dropping message from unknown connection {}", conn);
            return 0;
        };

        if state.rooms.insert(room.clone()) {
            info!("Connection {} joined room {}", conn, room);
        }
        let members = &mut self.rooms.entry(room).or_default().members;
        members.insert(conn);

        let mut delivered = 0;
        for member in members.iter().filter(|m| **m != conn) {
            let Some(peer) = self.conns.get(member) else {
                continue;
            };
            if peer.tx.send(msg.clone()).is_ok() {
                delivered += 1;
            } else {
                debug!("Skipping closed connection {}", member);
            }
        }
        delivered
    }

    fn disconnect(&mut self, conn: ConnectionId) {
        let Some(state) = self.conns.remove(&conn) else {
            return;
        };

        for room in state.rooms {
            let Some(entry) = self.rooms.get_mut(&room) else {
                continue;
            };
            entry.members.remove(&conn);

            if entry.members.is_empty() {
                self.rooms.remove(&room);
                info!("Room {} removed (empty)", room);
                continue;
            }

            if self.options.announce_leave {
                // Encoding a fixed frame cannot fail.
                if let Ok(notice) = Relayed::peer_left().encode() {
                    for member in &entry.members {
                        if let Some(peer) = self.conns.get(member) {
                            let _ = peer.tx.send(notice.clone());
                        }
                    }
                }
            }
            info!("Connection {} left room {}", conn, room);
        }
    }

    fn snapshot(&self) -> Vec<RoomSummary> {
        let mut rooms: Vec<RoomSummary> = self
            .rooms
            .iter()
            .map(|(room, entry)| RoomSummary {
                room: room.clone(),
                members: entry.members.len(),
            })
            .collect();
        rooms.sort_by(|a, b| a.room.cmp(&b.room));
        rooms
    }

    #[cfg(test)]
    fn rooms_of(&self, conn: ConnectionId) -> Vec<RoomKey> {
        let mut rooms: Vec<RoomKey> = self
            .conns
            .get(&conn)
            .map(|state| state.rooms.iter().cloned().collect())
            .unwrap_or_default();
        rooms.sort();
        rooms
    }
}

pub(crate) async fn room_manager_actor(mut rx: mpsc::Receiver<RoomCommand>, options: RoomOptions) {
    let mut table = RoomTable::new(options);

    while let Some(cmd) = rx.recv().await {
        match cmd {
            RoomCommand::Connect { tx, reply } => {
                let conn = table.connect(tx);
                debug!("Connection {} registered", conn);
                let _ = reply.send(conn);
            }

            RoomCommand::Relay {
                conn,
                room,
                msg,
                reply,
            } => {
                let delivered = table.relay(conn, room, msg);
                let _ = reply.send(delivered);
            }

            RoomCommand::Disconnect { conn } => {
                table.disconnect(conn);
                debug!(
                    "Connection {} unregistered ({} rooms, {} connections)",
                    conn,
                    table.rooms.len(),
                    table.conns.len()
                );
            }

            RoomCommand::Snapshot { reply } => {
                let _ = reply.send(table.snapshot());
            }

            #[cfg(test)]
            RoomCommand::RoomsOf { conn, reply } => {
                let _ = reply.send(table.rooms_of(conn));
            }
        }
    }
}

/// Handle to communicate with the room manager actor.
///
/// The actor is the only owner of the room table, so every membership change
/// and every broadcast is applied one at a time.
#[derive(Clone)]
pub struct RoomManagerHandle {
    pub(crate) tx: mpsc::Sender<RoomCommand>,
}

impl RoomManagerHandle {
    /// Spawn a room manager actor on the current runtime.
    pub fn spawn(options: RoomOptions) -> Self {
        let (tx, rx) = mpsc::channel::<RoomCommand>(1024);
        tokio::spawn(room_manager_actor(rx, options));
        Self { tx }
    }

    /// Register a new connection with no room memberships
    pub async fn connect(
        &self,
        tx: mpsc::UnboundedSender<OutboundMessage>,
    ) -> Result<ConnectionId, RelayError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(RoomCommand::Connect {
                tx,
                reply: reply_tx,
            })
            .await
            .map_err(|_| RelayError::ActorClosed)?;
        reply_rx.await.map_err(|_| RelayError::ActorClosed)
    }

    /// Join `room` (idempotent) and forward `msg` to its other members.
    /// Returns the number of members the frame was handed to.
    pub async fn relay(
        &self,
        conn: ConnectionId,
        room: RoomKey,
        msg: OutboundMessage,
    ) -> Result<usize, RelayError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(RoomCommand::Relay {
                conn,
                room,
                msg,
                reply: reply_tx,
            })
            .await
            .map_err(|_| RelayError::ActorClosed)?;
        reply_rx.await.map_err(|_| RelayError::ActorClosed)
    }

    /// Drop the connection from every room it joined
    pub async fn disconnect(&self, conn: ConnectionId) {
        let _ = self.tx.send(RoomCommand::Disconnect { conn }).await;
    }

    /// Current rooms and their member counts, sorted by room key
    pub async fn snapshot(&self) -> Result<Vec<RoomSummary>, RelayError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(RoomCommand::Snapshot { reply: reply_tx })
            .await
            .map_err(|_| RelayError::ActorClosed)?;
        reply_rx.await.map_err(|_| RelayError::ActorClosed)
    }

    /// Rooms `conn` currently belongs to, sorted
    #[cfg(test)]
    pub async fn rooms_of(&self, conn: ConnectionId) -> Result<Vec<RoomKey>, RelayError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(RoomCommand::RoomsOf {
                conn,
                reply: reply_tx,
            })
            .await
            .map_err(|_| RelayError::ActorClosed)?;
        reply_rx.await.map_err(|_| RelayError::ActorClosed)
    }
}
