use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::{Bytes, Message};
use tracing::{debug, error, info, warn};

use super::actor::RoomManagerHandle;
use super::envelope::Envelope;
use super::types::{ConnectionId, OutboundMessage, RelayError, RoomSummary};
use crate::config::RelayConfig;

const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// WebSocket adapter in front of the room manager.
pub struct RelayServer {
    handle: RoomManagerHandle,
    keepalive: Option<(Duration, Duration)>,
    stats_interval: Option<Duration>,
    ws_config: WebSocketConfig,
}

impl RelayServer {
    pub fn new(config: &RelayConfig) -> Self {
        let ws_config = WebSocketConfig::default()
            .max_message_size(Some(config.max_message_size))
            .max_frame_size(Some(config.max_message_size));

        Self {
            handle: RoomManagerHandle::spawn(config.room_options()),
            keepalive: config.keepalive(),
            stats_interval: config.stats_interval(),
            ws_config,
        }
    }

    pub fn handle(&self) -> RoomManagerHandle {
        self.handle.clone()
    }

    /// Bind `addr` and serve until `shutdown` resolves
    pub async fn run(
        &self,
        addr: SocketAddr,
        shutdown: impl Future<Output = ()>,
    ) -> std::io::Result<()> {
        let listener = TcpListener::bind(addr).await?;
        self.serve(listener, shutdown).await
    }

    pub async fn serve(
        &self,
        listener: TcpListener,
        shutdown: impl Future<Output = ()>,
    ) -> std::io::Result<()> {
        info!("Signaling relay listening on {}", listener.local_addr()?);
        tokio::pin!(shutdown);

        let stats_task = self
            .stats_interval
            .map(|every| tokio::spawn(report_rooms(self.handle.clone(), every)));

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutting down, no longer accepting connections");
                    if let Some(task) = &stats_task {
                        task.abort();
                    }
                    return Ok(());
                }

                accepted = listener.accept() => {
                    let (stream, addr) = match accepted {
                        Ok(a) => a,
                        Err(e) => {
                            warn!("Accept failed: {}", e);
                            continue;
                        }
                    };
                    let handle = self.handle.clone();
                    let keepalive = self.keepalive;
                    let ws_config = self.ws_config.clone();

                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, addr, handle, keepalive, ws_config).await {
                            error!("Connection error from {}: {}", addr, e);
                        }
                    });
                }
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    handle: RoomManagerHandle,
    keepalive: Option<(Duration, Duration)>,
    ws_config: WebSocketConfig,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let ws_stream = tokio_tungstenite::accept_async_with_config(stream, Some(ws_config)).await?;
    let (mut ws_tx, mut ws_rx) = ws_stream.split();

    let (tx, mut rx) = mpsc::unbounded_channel::<OutboundMessage>();
    let (ctrl_tx, mut ctrl_rx) = mpsc::unbounded_channel::<Message>();

    let conn = handle.connect(tx).await?;
    info!("WebSocket connection {} from {}", conn, addr);

    let mut ping_interval =
        keepalive.map(|(every, _)| tokio::time::interval_at(Instant::now() + every, every));
    let pong_timeout = keepalive.map(|(_, timeout)| timeout).unwrap_or_default();
    let mut waiting_for_pong = false;
    let mut pong_deadline: Option<Instant> = None;
    let mut peer_closed = false;

    let send_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                Some(msg) = rx.recv() => {
                    let ws_msg = Message::Text(msg.into_inner());
                    if ws_tx.send(ws_msg).await.is_err() {
                        break;
                    }
                }
                Some(ctrl_msg) = ctrl_rx.recv() => {
                    if ws_tx.send(ctrl_msg).await.is_err() {
                        break;
                    }
                }
                else => break,
            }
        }
    });

    loop {
        let ping_tick = async {
            match ping_interval.as_mut() {
                Some(interval) => {
                    interval.tick().await;
                }
                None => std::future::pending::<()>().await,
            }
        };
        let pong_expired = async {
            match pong_deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            _ = ping_tick => {
                if waiting_for_pong {
                    warn!("No Pong received, disconnecting {}", conn);
                    break;
                }
                if ctrl_tx.send(Message::Ping(Bytes::new())).is_err() {
                    break;
                }
                waiting_for_pong = true;
                pong_deadline = Some(Instant::now() + pong_timeout);
                debug!("Ping sent to {}", conn);
            }

            _ = pong_expired => {
                warn!("Pong timeout, disconnecting {}", conn);
                break;
            }

            msg = ws_rx.next() => {
                let msg = match msg {
                    Some(Ok(m)) => m,
                    Some(Err(e)) => {
                        warn!("WebSocket error on {}: {}", conn, e);
                        break;
                    }
                    None => break,
                };

                match msg {
                    Message::Text(text) => match handle_text_message(&text, conn, &handle).await {
                        Ok(()) => {}
                        Err(RelayError::ActorClosed) => {
                            error!("Room manager stopped, closing {}", conn);
                            break;
                        }
                        Err(e) => warn!("Dropping message from {}: {}", conn, e),
                    },
                    Message::Binary(data) => {
                        debug!("Ignoring {} byte binary frame from {}", data.len(), conn);
                    }
                    Message::Pong(_) => {
                        waiting_for_pong = false;
                        pong_deadline = None;
                        debug!("Pong received from {}", conn);
                    }
                    Message::Close(_) => {
                        info!("Close received from {}", conn);
                        peer_closed = true;
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    handle.disconnect(conn).await;

    if peer_closed {
        // tungstenite writes its Close reply on the next read
        let drain = async { while let Some(Ok(_)) = ws_rx.next().await {} };
        let _ = tokio::time::timeout(CLOSE_TIMEOUT, drain).await;
    }

    send_task.abort();
    info!("WebSocket disconnected: {} ({})", conn, addr);

    Ok(())
}

/// Decode one envelope and hand it to the room manager.
///
/// Awaiting the actor's reply before reading the next frame keeps
/// forwarding in receive order for each connection.
async fn handle_text_message(
    text: &str,
    conn: ConnectionId,
    handle: &RoomManagerHandle,
) -> Result<(), RelayError> {
    let envelope = Envelope::parse(text)?;

    let Some(room) = envelope.room_key() else {
        debug!("No room on {} message from {}, nothing to forward", envelope.kind, conn);
        return Ok(());
    };

    let frame = envelope.relayed()?;
    let delivered = handle.relay(conn, room.clone(), frame).await?;
    debug!(
        "Relayed {} from {} in room {} to {} peer(s)",
        envelope.kind, conn, room, delivered
    );

    Ok(())
}

/// Log the room table every `every` until the room manager goes away
async fn report_rooms(handle: RoomManagerHandle, every: Duration) {
    let mut interval = tokio::time::interval_at(Instant::now() + every, every);
    loop {
        interval.tick().await;
        match handle.snapshot().await {
            Ok(rooms) => info!("{}", describe_rooms(&rooms)),
            Err(_) => break,
        }
    }
}

fn describe_rooms(rooms: &[RoomSummary]) -> String {
    let members: usize = rooms.iter().map(|r| r.members).sum();
    let list = rooms
        .iter()
        .map(|r| format!("{}={}", r.room, r.members))
        .collect::<Vec<_>>()
        .join(", ");
    format!("{} room(s), {} member(s) [{}]", rooms.len(), members, list)
}
