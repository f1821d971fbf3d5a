//! # scribble-collab — Room-scoped collaborative drawing log
//!
//! Every room keeps one authoritative, append-only log of committed stroke
//! operations. Participants stage strokes privately, commit them into the
//! log, and undo/redo the room's most recent op. The log and periodic
//! checkpoints are persisted as JSON documents; a late joiner reconciles the
//! live timeline with the latest checkpoint.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐     WebSocket      ┌──────────────┐
//! │ CanvasClient │ ◄─────────────────► │ SyncServer   │
//! │ (per user)   │     Binary Proto    │ (central)    │
//! └──────┬───────┘                     └──────┬───────┘
//!        │                                    │
//!        ▼                                    ▼
//! ┌──────────────┐                     ┌──────────────┐
//! │ CanvasView   │                     │ RoomRegistry │
//! │ (reconciled) │                     └──────┬───────┘
//! └──────────────┘                            │ room_id
//!                                      ┌──────┴───────┐
//!                                      │ Room         │
//!                                      │  RoomSession ├──► LogStore / CheckpointStore
//!                                      │  Broadcast   │
//!                                      └──────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`op`] — Stroke operations, points, styles, staging keys
//! - [`session`] — Per-room operation log engine (stage, commit, undo/redo)
//! - [`storage`] — JSON log and checkpoint stores
//! - [`registry`] — Room lookup, roster and palette colors
//! - [`room`] — Message dispatch for one room
//! - [`broadcast`] — Room fan-out with backpressure
//! - [`reconcile`] — Join-time merge and the client canvas view
//! - [`protocol`] — Binary wire protocol (bincode-encoded messages)
//! - [`server`] — WebSocket sync server
//! - [`client`] — WebSocket canvas client

pub mod op;
pub mod session;
pub mod storage;
pub mod registry;
pub mod room;
pub mod broadcast;
pub mod reconcile;
pub mod protocol;
pub mod server;
pub mod client;

// Re-exports for convenience
pub use op::{
    ConnectionId, OpId, OpKind, ParticipantId, Point, StagingKey, StrokeOp, StrokeStyle,
    TempId, TempStroke, Tool,
};
pub use session::{RoomSession, SessionConfig, SessionStats};
pub use storage::{
    sanitize_room_id, Checkpoint, CheckpointStore, LogStore, StoreConfig, StoreError,
};
pub use registry::{palette_color, RoomRegistry, Roster, PALETTE_SIZE};
pub use room::{Admission, Room};
pub use broadcast::{BroadcastGroup, BroadcastStats, Frame};
pub use reconcile::{merge, replay, CanvasView, Surface};
pub use protocol::{ClientMessage, Participant, ProtocolError, ServerMessage};
pub use server::{ServerConfig, ServerStats, SyncServer, DEFAULT_ROOM};
pub use client::{CanvasClient, ClientEvent, ConnectionState};
