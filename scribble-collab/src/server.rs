//! WebSocket sync server with room-based routing.
//!
//! Architecture:
//! ```text
//! Client A ──┐
//!             ├── RoomRegistry ── Room (room_id) ── RoomSession ── LogStore
//! Client B ──┘                         │                  └─────── CheckpointStore
//!                                      └── BroadcastGroup
//!                                               │
//!                               ┌───────────────┼───────────────┐
//!                               ▼               ▼               ▼
//!                            Client A        Client B        Client C
//! ```
//!
//! A connection must `Join` first; anything else before that is ignored.
//! After joining, one task per connection selects over its WebSocket reader
//! and its room's broadcast receiver until the peer leaves or disconnects.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{Sink, SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, RwLock};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use uuid::Uuid;

use crate::broadcast::Frame;
use crate::op::ConnectionId;
use crate::protocol::{ClientMessage, Participant, ServerMessage};
use crate::registry::RoomRegistry;
use crate::room::{Admission, Room};
use crate::session::SessionConfig;
use crate::storage::StoreConfig;

type BoxError = Box<dyn std::error::Error + Send + Sync>;
type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;
type WsSource = SplitStream<WebSocketStream<TcpStream>>;
type Joined = (Arc<Room>, Participant, broadcast::Receiver<Arc<Frame>>);

/// Room joined when a client names none.
pub const DEFAULT_ROOM: &str = "lobby";

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Broadcast channel capacity per room
    pub broadcast_capacity: usize,
    /// Directory holding room logs and `checkpoints/`
    pub storage_root: PathBuf,
    /// Commits between checkpoints (0 disables checkpoints)
    pub checkpoint_interval: usize,
    pub default_room: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:3000".to_string(),
            broadcast_capacity: 256,
            storage_root: PathBuf::from("data"),
            checkpoint_interval: SessionConfig::default().checkpoint_interval,
            default_room: DEFAULT_ROOM.to_string(),
        }
    }
}

impl ServerConfig {
    /// Ephemeral port, storage under `root`.
    pub fn for_testing(root: impl Into<PathBuf>) -> Self {
        Self {
            bind_addr: "127.0.0.1:0".to_string(),
            storage_root: root.into(),
            ..Self::default()
        }
    }

    /// Override fields from environment-style variables.
    ///
    /// `SCRIBBLE_BIND` wins over `PORT` (which binds all interfaces).
    /// Unparseable values are logged and ignored.
    pub fn apply_env<F>(mut self, var: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(bind) = var("SCRIBBLE_BIND") {
            self.bind_addr = bind;
        } else if let Some(port) = var("PORT") {
            match port.parse::<u16>() {
                Ok(port) => self.bind_addr = format!("0.0.0.0:{port}"),
                Err(_) => log::warn!("Ignoring invalid PORT {port:?}"),
            }
        }
        if let Some(dir) = var("SCRIBBLE_DATA_DIR") {
            self.storage_root = PathBuf::from(dir);
        }
        if let Some(interval) = var("SCRIBBLE_CHECKPOINT_INTERVAL") {
            match interval.parse() {
                Ok(n) => self.checkpoint_interval = n,
                Err(_) => log::warn!("Ignoring invalid SCRIBBLE_CHECKPOINT_INTERVAL {interval:?}"),
            }
        }
        self
    }
}

/// Server statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_messages: u64,
    pub total_bytes: u64,
    /// Frames that failed to decode
    pub rejected_frames: u64,
    pub active_rooms: usize,
}

/// The sync server.
pub struct SyncServer {
    config: ServerConfig,
    registry: Arc<RoomRegistry>,
    stats: Arc<RwLock<ServerStats>>,
}

impl SyncServer {
    pub fn new(config: ServerConfig) -> Self {
        let registry = RoomRegistry::new(
            StoreConfig::new(&config.storage_root),
            SessionConfig {
                checkpoint_interval: config.checkpoint_interval,
            },
            config.broadcast_capacity,
        );
        Self {
            config,
            registry: Arc::new(registry),
            stats: Arc::new(RwLock::new(ServerStats::default())),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(ServerConfig::default())
    }

    /// Bind the configured address and serve until the listener fails.
    pub async fn run(&self) -> Result<(), BoxError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Accept connections on an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), BoxError> {
        log::info!(
            "Sync server listening on {} (data in {})",
            listener.local_addr()?,
            self.config.storage_root.display()
        );

        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let registry = self.registry.clone();
            let stats = self.stats.clone();
            let default_room = self.config.default_room.clone();

            tokio::spawn(async move {
                if let Err(e) =
                    Self::handle_connection(stream, addr, registry, stats, default_room).await
                {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    /// Handle a single WebSocket connection.
    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        registry: Arc<RoomRegistry>,
        stats: Arc<RwLock<ServerStats>>,
        default_room: String,
    ) -> Result<(), BoxError> {
        let ws_stream = tokio_tungstenite::accept_async(stream).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();
        let conn: ConnectionId = Uuid::new_v4();

        log::info!("WebSocket connection {conn} established from {addr}");
        {
            let mut s = stats.write().await;
            s.total_connections += 1;
            s.active_connections += 1;
        }

        let result = Self::serve_peer(
            conn,
            addr,
            &mut ws_sender,
            &mut ws_receiver,
            &registry,
            &stats,
            &default_room,
        )
        .await;

        stats.write().await.active_connections -= 1;
        log::info!("Connection {conn} from {addr} closed");
        result
    }

    /// Join, relay, then leave. Leave runs even when relaying failed.
    async fn serve_peer(
        conn: ConnectionId,
        addr: SocketAddr,
        ws_sender: &mut WsSink,
        ws_receiver: &mut WsSource,
        registry: &RoomRegistry,
        stats: &RwLock<ServerStats>,
        default_room: &str,
    ) -> Result<(), BoxError> {
        let joined = Self::await_join(
            conn,
            addr,
            ws_sender,
            ws_receiver,
            registry,
            stats,
            default_room,
        )
        .await?;
        let Some((room, me, rx)) = joined else {
            return Ok(());
        };

        let pumped = Self::pump(conn, addr, &room, &me, rx, ws_sender, ws_receiver, stats).await;
        if let Err(e) = room.leave(conn, me.id).await {
            log::warn!("Failed to announce departure of {}: {e}", me.id);
        }
        pumped
    }

    /// Read until the peer joins a room. `None` if it disconnects first.
    async fn await_join(
        conn: ConnectionId,
        addr: SocketAddr,
        ws_sender: &mut WsSink,
        ws_receiver: &mut WsSource,
        registry: &RoomRegistry,
        stats: &RwLock<ServerStats>,
        default_room: &str,
    ) -> Result<Option<Joined>, BoxError> {
        while let Some(msg) = ws_receiver.next().await {
            match msg? {
                Message::Binary(data) => {
                    let bytes: Vec<u8> = data.into();
                    let Some(client_msg) = Self::decode_counted(&bytes, addr, stats).await else {
                        continue;
                    };

                    match client_msg {
                        ClientMessage::Join { room_id } => {
                            let room_id = room_id
                                .filter(|id| !id.is_empty())
                                .unwrap_or_else(|| default_room.to_string());
                            let room = registry.get_or_create(&room_id).await;
                            let room_count = registry.room_count().await;
                            stats.write().await.active_rooms = room_count;

                            let admission = Self::admit(&room, conn, ws_sender).await?;
                            return Ok(Some((room, admission.participant, admission.receiver)));
                        }
                        ClientMessage::Leave => return Ok(None),
                        other => {
                            log::debug!("Ignoring {} from {addr} before join", other.name());
                        }
                    }
                }
                Message::Ping(data) => ws_sender.send(Message::Pong(data)).await?,
                Message::Close(_) => break,
                _ => {}
            }
        }
        Ok(None)
    }

    /// Join `room` and send the `Joined` reply. If the reply cannot be
    /// sent the participant is taken out again before the error returns.
    async fn admit<S>(room: &Room, conn: ConnectionId, sink: &mut S) -> Result<Admission, BoxError>
    where
        S: Sink<Message> + Unpin,
        S::Error: std::error::Error + Send + Sync + 'static,
    {
        let admission = room.join(conn).await?;
        let sent = match admission.welcome.encode() {
            Ok(bytes) => sink
                .send(Message::Binary(bytes.into()))
                .await
                .map_err(BoxError::from),
            Err(e) => Err(BoxError::from(e)),
        };

        if let Err(e) = sent {
            let id = admission.participant.id;
            log::warn!("Welcome to {id} failed, leaving room {:?}: {e}", room.id());
            if let Err(leave_err) = room.leave(conn, id).await {
                log::warn!("Failed to announce departure of {id}: {leave_err}");
            }
            return Err(e);
        }
        Ok(admission)
    }

    /// Relay between a joined peer and its room.
    #[allow(clippy::too_many_arguments)]
    async fn pump(
        conn: ConnectionId,
        addr: SocketAddr,
        room: &Room,
        me: &Participant,
        mut broadcast_rx: broadcast::Receiver<Arc<Frame>>,
        ws_sender: &mut WsSink,
        ws_receiver: &mut WsSource,
        stats: &RwLock<ServerStats>,
    ) -> Result<(), BoxError> {
        loop {
            tokio::select! {
                // Incoming WebSocket message
                msg = ws_receiver.next() => {
                    match msg {
                        Some(Ok(Message::Binary(data))) => {
                            let bytes: Vec<u8> = data.into();
                            let decoded = Self::decode_counted(&bytes, addr, stats).await;
                            let Some(client_msg) = decoded else {
                                continue;
                            };
                            if matches!(client_msg, ClientMessage::Leave) {
                                break;
                            }
                            log::trace!(
                                "{} from {} in room {:?}",
                                client_msg.name(),
                                me.id,
                                room.id()
                            );
                            if let Some(reply) = room.handle(conn, me, client_msg).await? {
                                Self::send(ws_sender, &reply).await?;
                            }
                        }

                        Some(Ok(Message::Close(_))) | None => break,

                        Some(Ok(Message::Ping(data))) => {
                            ws_sender.send(Message::Pong(data)).await?;
                        }

                        Some(Err(e)) => {
                            log::error!("WebSocket error from {addr}: {e}");
                            break;
                        }

                        _ => {}
                    }
                }

                // Outgoing broadcast frame
                frame = broadcast_rx.recv() => {
                    match frame {
                        Ok(frame) => {
                            if frame.is_for(conn) {
                                ws_sender.send(Message::Binary(frame.bytes.clone().into())).await?;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            log::warn!(
                                "Participant {} lagged by {n} messages in room {:?}",
                                me.id,
                                room.id()
                            );
                            room.broadcast().record_lag(n);
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        }
        Ok(())
    }

    async fn decode_counted(
        bytes: &[u8],
        addr: SocketAddr,
        stats: &RwLock<ServerStats>,
    ) -> Option<ClientMessage> {
        let mut s = stats.write().await;
        match ClientMessage::decode(bytes) {
            Ok(msg) => {
                s.total_messages += 1;
                s.total_bytes += bytes.len() as u64;
                Some(msg)
            }
            Err(e) => {
                s.rejected_frames += 1;
                log::warn!("Failed to decode message from {addr}: {e}");
                None
            }
        }
    }

    async fn send(ws_sender: &mut WsSink, msg: &ServerMessage) -> Result<(), BoxError> {
        ws_sender.send(Message::Binary(msg.encode()?.into())).await?;
        Ok(())
    }

    pub async fn stats(&self) -> ServerStats {
        self.stats.read().await.clone()
    }

    pub fn registry(&self) -> &Arc<RoomRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }
}
