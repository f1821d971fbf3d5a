//! Binary protocol between canvas clients and the sync server.
//!
//! Every WebSocket binary frame carries exactly one message, bincode-encoded
//! (serde mode, standard config):
//! ```text
//! client ──► server : ClientMessage  (Join, StrokeStart, StrokeAppend, StrokeCommit,
//!                                     Undo, Redo, Cursor, RequestCheckpoint, Ping, Leave)
//! server ──► client : ServerMessage  (Joined, Roster, PeerJoined, PeerLeft, StrokeStarted,
//!                                     StrokeAppended, OpCommitted, OpToggled, CursorMoved,
//!                                     Checkpoint, Pong)
//! ```
//!
//! Decoding is the validation boundary: nothing past `decode` sees untyped
//! data.

use serde::{Deserialize, Serialize};

use crate::op::{ConnectionId, OpId, ParticipantId, Point, StrokeOp, StrokeStyle, TempId};
use crate::storage::Checkpoint;

/// A participant as listed in a room roster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: ParticipantId,
    /// Palette color assigned on join
    pub color: String,
}

/// Messages sent by clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ClientMessage {
    /// Enter a room. `None` or an empty id means the default room.
    Join { room_id: Option<String> },
    StrokeStart {
        temp_id: TempId,
        style: StrokeStyle,
        start: Point,
    },
    StrokeAppend { temp_id: TempId, points: Vec<Point> },
    StrokeCommit { temp_id: TempId },
    Undo,
    Redo,
    /// Live cursor position, relayed to the rest of the room
    Cursor { x: f32, y: f32 },
    /// Ask for the room's latest checkpoint (join-time side channel)
    RequestCheckpoint,
    /// Latency ping; echoed back as `Pong`
    Ping { client_ts: u64 },
    Leave,
}

/// Messages sent by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ServerMessage {
    /// Reply to `Join`: own identity, roster and the live timeline
    /// (insertion order, unsorted).
    Joined {
        me: Participant,
        participants: Vec<Participant>,
        timeline: Vec<StrokeOp>,
        room_id: String,
    },
    /// Full roster, ordered by join
    Roster(Vec<Participant>),
    PeerJoined(Participant),
    PeerLeft(ParticipantId),
    StrokeStarted {
        author_id: ParticipantId,
        temp_id: TempId,
        style: StrokeStyle,
        start: Point,
    },
    StrokeAppended {
        author_id: ParticipantId,
        temp_id: TempId,
        points: Vec<Point>,
    },
    OpCommitted {
        op: StrokeOp,
        temp_id: TempId,
        author_conn: ConnectionId,
    },
    OpToggled { op_id: OpId, active: bool, seq: u64 },
    CursorMoved {
        participant_id: ParticipantId,
        color: String,
        x: f32,
        y: f32,
        timestamp: u64,
    },
    /// Reply to `RequestCheckpoint`; `None` when the room has none yet
    Checkpoint(Option<Checkpoint>),
    Pong { client_ts: u64 },
}

impl ClientMessage {
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        encode(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        decode(bytes)
    }

    /// Short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Join { .. } => "join",
            Self::StrokeStart { .. } => "stroke-start",
            Self::StrokeAppend { .. } => "stroke-append",
            Self::StrokeCommit { .. } => "stroke-commit",
            Self::Undo => "undo",
            Self::Redo => "redo",
            Self::Cursor { .. } => "cursor",
            Self::RequestCheckpoint => "request-checkpoint",
            Self::Ping { .. } => "ping",
            Self::Leave => "leave",
        }
    }
}

impl ServerMessage {
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        encode(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        decode(bytes)
    }
}

fn encode<T: Serialize>(msg: &T) -> Result<Vec<u8>, ProtocolError> {
    bincode::serde::encode_to_vec(msg, bincode::config::standard())
        .map_err(|e| ProtocolError::SerializationError(e.to_string()))
}

fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T, ProtocolError> {
    let (msg, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .map_err(|e| ProtocolError::DeserializationError(e.to_string()))?;
    Ok(msg)
}

/// Protocol errors.
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolError {
    SerializationError(String),
    DeserializationError(String),
    ConnectionClosed,
    NotConnected,
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SerializationError(e) => write!(f, "Serialization error: {e}"),
            Self::DeserializationError(e) => write!(f, "Deserialization error: {e}"),
            Self::ConnectionClosed => write!(f, "Connection closed"),
            Self::NotConnected => write!(f, "Not connected"),
        }
    }
}

impl std::error::Error for ProtocolError {}
