//! Persistent storage layer for room operation logs.
//!
//! Architecture:
//! ```text
//! ┌─────────────┐  every commit/toggle   ┌──────────────────────────────┐
//! │ RoomSession │ ─────────────────────► │ LogStore                     │
//! │ (in-memory) │   (full rewrite)       │   <root>/canvas-<room>.json  │
//! └──────┬──────┘                        └──────────────────────────────┘
//!        │ every N commits               ┌──────────────────────────────────────────────┐
//!        └─────────────────────────────► │ CheckpointStore                              │
//!                                        │   <root>/checkpoints/checkpoint-<room>.json  │
//!                                        └──────────────────────────────────────────────┘
//! ```
//!
//! Both stores are stateless: every call goes to disk and nothing is cached
//! between calls. Loads never fail; absent, unreadable or malformed documents
//! come back empty. Saves report failures to the caller, who keeps its
//! in-memory state authoritative.
//!
//! Writing the whole log on every mutation costs O(log size) per write. That
//! is a known scalability limit of this format.

pub mod checkpoint;
pub mod log_store;

pub use checkpoint::{Checkpoint, CheckpointStore};
pub use log_store::LogStore;

use std::fs;
use std::path::{Path, PathBuf};

use crate::op::{OpId, StrokeOp};

/// Store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Data directory; log files live here, checkpoints in `checkpoints/`
    pub root: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("data"),
        }
    }
}

impl StoreConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Open both stores rooted at this directory.
    pub fn open(&self) -> (LogStore, CheckpointStore) {
        (
            LogStore::new(&self.root),
            CheckpointStore::new(self.root.join("checkpoints")),
        )
    }
}

/// Storage errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// JSON would write the value as `null` and the document would no
    /// longer load.
    #[error("op {op_id} has a non-finite coordinate or width")]
    NonFinite { op_id: OpId },
}

/// Refuse ops that cannot round-trip through JSON.
pub(crate) fn ensure_finite(ops: &[StrokeOp]) -> Result<(), StoreError> {
    match ops.iter().find(|op| !op.is_finite()) {
        Some(op) => Err(StoreError::NonFinite { op_id: op.op_id }),
        None => Ok(()),
    }
}

/// Map a room id to a filesystem-safe fragment.
///
/// Anything outside `[A-Za-z0-9._-]` becomes `_`.
pub fn sanitize_room_id(room_id: &str) -> String {
    room_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Replace `path` with `contents` via a sibling temp file and a rename.
pub(crate) fn write_replace(path: &Path, contents: &[u8]) -> Result<(), StoreError> {
    let io_err = |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_err)?;
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    fs::write(&tmp, contents).map_err(io_err)?;
    fs::rename(&tmp, path).map_err(io_err)
}

/// Read a whole file, `None` when it does not exist.
pub(crate) fn read_if_exists(path: &Path) -> Result<Option<String>, StoreError> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(StoreError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}
