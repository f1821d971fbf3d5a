//! Drawing operation data model.
//!
//! A stroke lives in two phases:
//! ```text
//! stroke-start ──► TempStroke (staged) ──► commit ──► StrokeOp (logged)
//!                       ▲                                  │
//!                  stroke-append                      undo / redo
//!                                                  (toggle + new seq)
//! ```
//!
//! Only `StrokeOp` is persisted; `TempStroke` is discarded on commit or
//! when its connection goes away.

use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use uuid::Uuid;

/// Globally unique id of a committed operation.
pub type OpId = Uuid;

/// Id of a participant (one per join).
pub type ParticipantId = Uuid;

/// Id of a transport connection, minted by the server per socket.
pub type ConnectionId = Uuid;

/// Client-chosen id of an in-flight stroke. Only unique per connection.
pub type TempId = String;

/// A sampled location along a stroke.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
    /// Milliseconds since the Unix epoch, as sampled by the client.
    pub timestamp: u64,
}

impl Point {
    pub fn new(x: f32, y: f32, timestamp: u64) -> Self {
        Self { x, y, timestamp }
    }

    /// Point stamped with the current wall clock.
    pub fn now(x: f32, y: f32) -> Self {
        Self::new(x, y, now_millis())
    }

    /// Both coordinates are finite. JSON has no NaN or infinity, so
    /// anything else cannot be persisted.
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// Drawing tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tool {
    Brush,
    Eraser,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrokeStyle {
    /// CSS color string, e.g. `#1e90ff` or `hsl(120 80% 50%)`
    pub color: String,
    pub width: f32,
    pub tool: Tool,
}

impl StrokeStyle {
    pub fn brush(color: impl Into<String>, width: f32) -> Self {
        Self {
            color: color.into(),
            width,
            tool: Tool::Brush,
        }
    }

    pub fn eraser(width: f32) -> Self {
        Self {
            color: String::from("#000000"),
            width,
            tool: Tool::Eraser,
        }
    }

    /// Width is finite and not negative.
    pub fn is_valid(&self) -> bool {
        self.width.is_finite() && self.width >= 0.0
    }
}

/// Kind of a committed operation, fixed at commit time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpKind {
    Stroke,
    Erase,
}

impl From<Tool> for OpKind {
    fn from(tool: Tool) -> Self {
        match tool {
            Tool::Brush => OpKind::Stroke,
            Tool::Eraser => OpKind::Erase,
        }
    }
}

/// A committed drawing operation.
///
/// Everything but `active` and `seq` is immutable after commit. `seq` is
/// re-assigned on every toggle, so ordering by `seq` is event order
/// (commit, undo, redo), which is also the compositing order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrokeOp {
    pub op_id: OpId,
    pub kind: OpKind,
    pub style: StrokeStyle,
    pub points: Vec<Point>,
    pub active: bool,
    pub seq: u64,
    pub author_id: ParticipantId,
}

impl StrokeOp {
    /// Every float in the op is finite, so it survives a JSON round trip.
    pub fn is_finite(&self) -> bool {
        self.style.width.is_finite() && self.points.iter().all(Point::is_finite)
    }
}

/// An in-flight stroke, staged until its author commits it.
#[derive(Debug, Clone, PartialEq)]
pub struct TempStroke {
    pub style: StrokeStyle,
    pub points: Vec<Point>,
    pub author_id: ParticipantId,
}

impl TempStroke {
    pub fn new(author_id: ParticipantId, style: StrokeStyle, first: Point) -> Self {
        Self {
            style,
            points: vec![first],
            author_id,
        }
    }

    /// Turn the staged stroke into a committed op.
    pub fn into_op(self, op_id: OpId, seq: u64) -> StrokeOp {
        StrokeOp {
            op_id,
            kind: OpKind::from(self.style.tool),
            style: self.style,
            points: self.points,
            active: true,
            seq,
            author_id: self.author_id,
        }
    }
}

/// Staging key: temp ids collide across connections, so the connection is
/// part of the key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StagingKey {
    pub conn: ConnectionId,
    pub temp_id: TempId,
}

impl StagingKey {
    pub fn new(conn: ConnectionId, temp_id: impl Into<TempId>) -> Self {
        Self {
            conn,
            temp_id: temp_id.into(),
        }
    }
}

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
