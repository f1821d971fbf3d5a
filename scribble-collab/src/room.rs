//! A room: operation log session, roster and broadcast group.
//!
//! ```text
//!  ClientMessage ──► Room::handle ──► RoomSession (write lock)
//!                        │                 │
//!                        │ reply           └─► BroadcastGroup ──► every connection
//!                        ▼
//!                  originating connection
//! ```
//!
//! Mutations hold the session write lock while broadcasting, so frames leave
//! in seq order and a joiner's timeline snapshot and subscription happen
//! atomically with respect to commits.

use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

use crate::broadcast::{BroadcastGroup, Frame};
use crate::op::{now_millis, ConnectionId, ParticipantId, StrokeOp};
use crate::protocol::{ClientMessage, Participant, ProtocolError, ServerMessage};
use crate::registry::Roster;
use crate::session::{RoomSession, SessionStats};

pub struct Room {
    id: String,
    session: RwLock<RoomSession>,
    roster: RwLock<Roster>,
    broadcast: BroadcastGroup,
}

/// What a connection gets back from `Room::join`.
pub struct Admission {
    pub participant: Participant,
    pub receiver: broadcast::Receiver<Arc<Frame>>,
    /// The `Joined` reply, to be sent before anything from `receiver`
    pub welcome: ServerMessage,
}

impl Room {
    pub fn new(id: impl Into<String>, session: RoomSession, broadcast_capacity: usize) -> Self {
        Self {
            id: id.into(),
            session: RwLock::new(session),
            roster: RwLock::new(Roster::default()),
            broadcast: BroadcastGroup::new(broadcast_capacity),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn broadcast(&self) -> &BroadcastGroup {
        &self.broadcast
    }

    pub async fn add_participant(&self) -> Participant {
        self.roster.write().await.admit()
    }

    pub async fn remove_participant(&self, id: ParticipantId) -> Option<Participant> {
        self.roster.write().await.remove(id)
    }

    pub async fn participants(&self) -> Vec<Participant> {
        self.roster.read().await.list()
    }

    /// Live timeline in insertion order.
    pub async fn timeline(&self) -> Vec<StrokeOp> {
        self.session.read().await.timeline()
    }

    pub async fn stats(&self) -> SessionStats {
        self.session.read().await.stats()
    }

    /// Admit a new connection.
    ///
    /// Registers a participant, subscribes to the room and builds the
    /// `Joined` reply, then announces the newcomer: the roster to everyone
    /// (newcomer included) and `PeerJoined` to the others.
    pub async fn join(&self, conn: ConnectionId) -> Result<Admission, ProtocolError> {
        let participant = self.add_participant().await;

        let (receiver, timeline) = {
            let session = self.session.read().await;
            (self.broadcast.subscribe(), session.timeline())
        };

        let participants = self.participants().await;
        let welcome = ServerMessage::Joined {
            me: participant.clone(),
            participants: participants.clone(),
            timeline,
            room_id: self.id.clone(),
        };

        self.broadcast.broadcast_all(&ServerMessage::Roster(participants))?;
        self.broadcast
            .broadcast_others(conn, &ServerMessage::PeerJoined(participant.clone()))?;

        log::info!(
            "Participant {} joined room {:?} ({} present)",
            participant.id,
            self.id,
            self.roster.read().await.len()
        );

        Ok(Admission {
            participant,
            receiver,
            welcome,
        })
    }

    /// Remove a connection: its staged strokes are dropped silently, then
    /// the roster and `PeerLeft` go out.
    pub async fn leave(
        &self,
        conn: ConnectionId,
        participant_id: ParticipantId,
    ) -> Result<(), ProtocolError> {
        let abandoned = self.session.write().await.abandon_connection(conn);
        if abandoned > 0 {
            log::debug!("Dropped {abandoned} unfinished strokes from {conn} in room {:?}", self.id);
        }

        self.remove_participant(participant_id).await;
        let participants = self.participants().await;
        self.broadcast.broadcast_all(&ServerMessage::Roster(participants))?;
        self.broadcast
            .broadcast_others(conn, &ServerMessage::PeerLeft(participant_id))?;

        log::info!("Participant {participant_id} left room {:?}", self.id);
        Ok(())
    }

    /// Apply one client message on behalf of `me` connected as `conn`.
    ///
    /// Returns the direct reply for the originating connection, if any.
    /// Messages referring to strokes that are not staged, and strokes or
    /// cursors carrying non-finite numbers, are dropped without a broadcast.
    pub async fn handle(
        &self,
        conn: ConnectionId,
        me: &Participant,
        msg: ClientMessage,
    ) -> Result<Option<ServerMessage>, ProtocolError> {
        match msg {
            ClientMessage::StrokeStart {
                temp_id,
                style,
                start,
            } => {
                let mut session = self.session.write().await;
                if !session.start_temp(conn, &temp_id, me.id, style.clone(), start) {
                    return Ok(None);
                }
                self.broadcast.broadcast_others(
                    conn,
                    &ServerMessage::StrokeStarted {
                        author_id: me.id,
                        temp_id,
                        style,
                        start,
                    },
                )?;
            }

            ClientMessage::StrokeAppend { temp_id, points } => {
                let mut session = self.session.write().await;
                if session.append_temp(conn, &temp_id, &points) {
                    self.broadcast.broadcast_others(
                        conn,
                        &ServerMessage::StrokeAppended {
                            author_id: me.id,
                            temp_id,
                            points,
                        },
                    )?;
                }
            }

            ClientMessage::StrokeCommit { temp_id } => {
                let mut session = self.session.write().await;
                match session.commit_temp(conn, &temp_id) {
                    Some(op) => {
                        log::debug!(
                            "Room {:?} committed {} (seq {}) by {}",
                            self.id,
                            op.op_id,
                            op.seq,
                            me.id
                        );
                        self.broadcast.broadcast_all(&ServerMessage::OpCommitted {
                            op,
                            temp_id,
                            author_conn: conn,
                        })?;
                    }
                    None => log::debug!("Stale commit {temp_id:?} from {conn} ignored"),
                }
            }

            ClientMessage::Undo => {
                let mut session = self.session.write().await;
                if let Some(op) = session.toggle_last_active() {
                    self.announce_toggle(&op)?;
                }
            }

            ClientMessage::Redo => {
                let mut session = self.session.write().await;
                if let Some(op) = session.toggle_last_inactive() {
                    self.announce_toggle(&op)?;
                }
            }

            ClientMessage::Cursor { x, y } => {
                if !(x.is_finite() && y.is_finite()) {
                    log::debug!("Dropped non-finite cursor from {conn} in room {:?}", self.id);
                    return Ok(None);
                }
                log::trace!("Cursor update from {} in room {:?}", me.id, self.id);
                self.broadcast.broadcast_others(
                    conn,
                    &ServerMessage::CursorMoved {
                        participant_id: me.id,
                        color: me.color.clone(),
                        x,
                        y,
                        timestamp: now_millis(),
                    },
                )?;
            }

            ClientMessage::RequestCheckpoint => {
                let checkpoint = self.session.read().await.latest_checkpoint();
                return Ok(Some(ServerMessage::Checkpoint(checkpoint)));
            }

            ClientMessage::Ping { client_ts } => {
                return Ok(Some(ServerMessage::Pong { client_ts }));
            }

            ClientMessage::Join { .. } => {
                log::debug!("Ignoring repeated join from {conn} in room {:?}", self.id);
            }

            // Handled by the connection loop.
            ClientMessage::Leave => {}
        }

        Ok(None)
    }

    fn announce_toggle(&self, op: &StrokeOp) -> Result<usize, ProtocolError> {
        log::debug!(
            "Room {:?} toggled {} -> active={} (seq {})",
            self.id,
            op.op_id,
            op.active,
            op.seq
        );
        self.broadcast.broadcast_all(&ServerMessage::OpToggled {
            op_id: op.op_id,
            active: op.active,
            seq: op.seq,
        })
    }
}
