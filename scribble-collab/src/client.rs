//! WebSocket canvas client for connecting to the sync server.
//!
//! Provides:
//! - Connection lifecycle (connect, leave)
//! - Stroke staging (`start_stroke` / `append_points` / `commit_stroke`)
//!   and room-wide undo/redo
//! - Join-time reconciliation: after `Joined` the client asks for the
//!   room's checkpoint and folds it into its [`CanvasView`]
//! - Cursor relay and latency pings
//!
//! The view is kept current by the reader task; the application observes
//! changes through [`ClientEvent`]s.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::Message;

use crate::op::{now_millis, OpId, ParticipantId, Point, StrokeOp, StrokeStyle, TempId};
use crate::protocol::{ClientMessage, Participant, ProtocolError, ServerMessage};
use crate::reconcile::CanvasView;

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Events emitted by the canvas client.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Connected,
    Disconnected,
    /// Admitted to a room; the view holds the live timeline
    Joined { me: Participant, room_id: String },
    Roster(Vec<Participant>),
    PeerJoined(Participant),
    PeerLeft(ParticipantId),
    /// Another participant's in-progress stroke
    RemoteStrokeStarted {
        author_id: ParticipantId,
        temp_id: TempId,
        style: StrokeStyle,
        start: Point,
    },
    RemoteStrokeAppended {
        author_id: ParticipantId,
        temp_id: TempId,
        points: Vec<Point>,
    },
    /// An op entered the room log. `own` is set for this client's strokes.
    Committed { op: StrokeOp, temp_id: TempId, own: bool },
    Toggled { op_id: OpId, active: bool, seq: u64 },
    /// The checkpoint reply was merged into the view (`ops` = snapshot size)
    CheckpointMerged { ops: usize },
    Cursor {
        participant_id: ParticipantId,
        color: String,
        x: f32,
        y: f32,
    },
    Pong { rtt_ms: u64 },
}

/// The canvas client.
pub struct CanvasClient {
    server_url: String,
    /// Requested room; `None` joins the server's default room
    room_id: Option<String>,

    state: Arc<RwLock<ConnectionState>>,
    me: Arc<RwLock<Option<Participant>>>,
    view: Arc<RwLock<CanvasView>>,

    /// Source of per-connection temp ids
    next_temp: AtomicU64,

    /// Channel to the WebSocket writer task
    outgoing_tx: Option<mpsc::Sender<Vec<u8>>>,

    event_rx: Option<mpsc::Receiver<ClientEvent>>,
    event_tx: mpsc::Sender<ClientEvent>,
}

impl CanvasClient {
    pub fn new(server_url: impl Into<String>, room_id: Option<String>) -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);
        Self {
            server_url: server_url.into(),
            room_id,
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            me: Arc::new(RwLock::new(None)),
            view: Arc::new(RwLock::new(CanvasView::default())),
            next_temp: AtomicU64::new(0),
            outgoing_tx: None,
            event_rx: Some(event_rx),
            event_tx,
        }
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<ClientEvent>> {
        self.event_rx.take()
    }

    /// Connect and join the room.
    ///
    /// Spawns a writer and a reader task. Returns once the `Join` is queued;
    /// the `Joined` reply arrives as [`ClientEvent::Joined`].
    pub async fn connect(&mut self) -> Result<(), ProtocolError> {
        *self.state.write().await = ConnectionState::Connecting;

        let (ws_stream, _) = match tokio_tungstenite::connect_async(&self.server_url).await {
            Ok(ok) => ok,
            Err(e) => {
                log::warn!("Failed to connect to {}: {e}", self.server_url);
                *self.state.write().await = ConnectionState::Disconnected;
                return Err(ProtocolError::ConnectionClosed);
            }
        };
        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        // Writer task: forward outgoing channel to WebSocket
        let (out_tx, mut out_rx) = mpsc::channel::<Vec<u8>>(256);
        tokio::spawn(async move {
            while let Some(data) = out_rx.recv().await {
                if ws_writer.send(Message::Binary(data.into())).await.is_err() {
                    break;
                }
            }
            let _ = ws_writer.close().await;
        });

        let join = ClientMessage::Join {
            room_id: self.room_id.clone(),
        };
        out_tx
            .send(join.encode()?)
            .await
            .map_err(|_| ProtocolError::ConnectionClosed)?;
        self.outgoing_tx = Some(out_tx.clone());

        *self.state.write().await = ConnectionState::Connected;
        let _ = self.event_tx.send(ClientEvent::Connected).await;

        // Reader task: apply server messages to the view
        let event_tx = self.event_tx.clone();
        let state = self.state.clone();
        let me = self.me.clone();
        let view = self.view.clone();
        tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                match msg {
                    Ok(Message::Binary(data)) => {
                        let bytes: Vec<u8> = data.into();
                        let server_msg = match ServerMessage::decode(&bytes) {
                            Ok(m) => m,
                            Err(e) => {
                                log::warn!("Dropping undecodable server frame: {e}");
                                continue;
                            }
                        };
                        let event = Self::apply(server_msg, &me, &view, &out_tx).await;
                        if let Some(evt) = event {
                            let _ = event_tx.send(evt).await;
                        }
                    }
                    Ok(Message::Close(_)) | Err(_) => break,
                    _ => {}
                }
            }

            // Connection lost
            *state.write().await = ConnectionState::Disconnected;
            let _ = event_tx.send(ClientEvent::Disconnected).await;
        });

        Ok(())
    }

    /// Fold one server message into local state.
    async fn apply(
        msg: ServerMessage,
        me: &RwLock<Option<Participant>>,
        view: &RwLock<CanvasView>,
        out_tx: &mpsc::Sender<Vec<u8>>,
    ) -> Option<ClientEvent> {
        match msg {
            ServerMessage::Joined {
                me: participant,
                participants: _,
                timeline,
                room_id,
            } => {
                *view.write().await = CanvasView::from_timeline(&timeline);
                *me.write().await = Some(participant.clone());
                log::info!(
                    "Joined room {room_id:?} as {} ({} ops)",
                    participant.id,
                    timeline.len()
                );

                // Side channel: the checkpoint may hold history the live
                // timeline was not given.
                if let Ok(request) = ClientMessage::RequestCheckpoint.encode() {
                    let _ = out_tx.send(request).await;
                }
                Some(ClientEvent::Joined {
                    me: participant,
                    room_id,
                })
            }
            ServerMessage::Checkpoint(checkpoint) => {
                let ops = checkpoint.map(|cp| cp.ops).unwrap_or_default();
                view.write().await.absorb_checkpoint(&ops);
                Some(ClientEvent::CheckpointMerged { ops: ops.len() })
            }
            ServerMessage::OpCommitted { op, temp_id, .. } => {
                let own = me.read().await.as_ref().is_some_and(|p| p.id == op.author_id);
                view.write().await.apply_commit(op.clone());
                Some(ClientEvent::Committed { op, temp_id, own })
            }
            ServerMessage::OpToggled { op_id, active, seq } => {
                if !view.write().await.apply_toggle(op_id, active, seq) {
                    log::debug!("Ignoring stale toggle of {op_id} (seq {seq})");
                }
                Some(ClientEvent::Toggled { op_id, active, seq })
            }
            ServerMessage::Roster(list) => Some(ClientEvent::Roster(list)),
            ServerMessage::PeerJoined(p) => Some(ClientEvent::PeerJoined(p)),
            ServerMessage::PeerLeft(id) => Some(ClientEvent::PeerLeft(id)),
            ServerMessage::StrokeStarted {
                author_id,
                temp_id,
                style,
                start,
            } => Some(ClientEvent::RemoteStrokeStarted {
                author_id,
                temp_id,
                style,
                start,
            }),
            ServerMessage::StrokeAppended {
                author_id,
                temp_id,
                points,
            } => Some(ClientEvent::RemoteStrokeAppended {
                author_id,
                temp_id,
                points,
            }),
            ServerMessage::CursorMoved {
                participant_id,
                color,
                x,
                y,
                ..
            } => Some(ClientEvent::Cursor {
                participant_id,
                color,
                x,
                y,
            }),
            ServerMessage::Pong { client_ts } => Some(ClientEvent::Pong {
                rtt_ms: now_millis().saturating_sub(client_ts),
            }),
        }
    }

    /// Begin a stroke. Returns the temp id to use for its appends and commit.
    pub async fn start_stroke(
        &self,
        style: StrokeStyle,
        start: Point,
    ) -> Result<TempId, ProtocolError> {
        let temp_id = format!("t{}", self.next_temp.fetch_add(1, Ordering::Relaxed));
        self.send(&ClientMessage::StrokeStart {
            temp_id: temp_id.clone(),
            style,
            start,
        })
        .await?;
        Ok(temp_id)
    }

    pub async fn append_points(
        &self,
        temp_id: &str,
        points: Vec<Point>,
    ) -> Result<(), ProtocolError> {
        self.send(&ClientMessage::StrokeAppend {
            temp_id: temp_id.to_string(),
            points,
        })
        .await
    }

    pub async fn commit_stroke(&self, temp_id: &str) -> Result<(), ProtocolError> {
        self.send(&ClientMessage::StrokeCommit {
            temp_id: temp_id.to_string(),
        })
        .await
    }

    /// Undo the room's most recent active op (whoever drew it).
    pub async fn undo(&self) -> Result<(), ProtocolError> {
        self.send(&ClientMessage::Undo).await
    }

    pub async fn redo(&self) -> Result<(), ProtocolError> {
        self.send(&ClientMessage::Redo).await
    }

    pub async fn send_cursor(&self, x: f32, y: f32) -> Result<(), ProtocolError> {
        self.send(&ClientMessage::Cursor { x, y }).await
    }

    /// Send a latency ping; the reply arrives as [`ClientEvent::Pong`].
    pub async fn ping(&self) -> Result<(), ProtocolError> {
        self.send(&ClientMessage::Ping {
            client_ts: now_millis(),
        })
        .await
    }

    pub async fn request_checkpoint(&self) -> Result<(), ProtocolError> {
        self.send(&ClientMessage::RequestCheckpoint).await
    }

    /// Leave the room and drop the connection.
    pub async fn leave(&mut self) -> Result<(), ProtocolError> {
        let result = self.send(&ClientMessage::Leave).await;
        // Dropping the sender ends the writer task, which closes the socket.
        self.outgoing_tx = None;
        *self.state.write().await = ConnectionState::Disconnected;
        result
    }

    async fn send(&self, msg: &ClientMessage) -> Result<(), ProtocolError> {
        if *self.state.read().await != ConnectionState::Connected {
            return Err(ProtocolError::NotConnected);
        }
        let tx = self.outgoing_tx.as_ref().ok_or(ProtocolError::NotConnected)?;
        tx.send(msg.encode()?)
            .await
            .map_err(|_| ProtocolError::ConnectionClosed)
    }

    pub async fn connection_state(&self) -> ConnectionState {
        *self.state.read().await
    }

    /// Own participant record, once joined.
    pub async fn me(&self) -> Option<Participant> {
        self.me.read().await.clone()
    }

    /// Snapshot of the reconciled view.
    pub async fn view(&self) -> CanvasView {
        self.view.read().await.clone()
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    pub fn room_id(&self) -> Option<&str> {
        self.room_id.as_deref()
    }
}
