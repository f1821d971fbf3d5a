//! Periodic full snapshots of a room's log.
//!
//! Redundant with `LogStore` by construction: a checkpoint is always a
//! (possibly stale) earlier state of the full log. It is what late joiners
//! fetch on the side channel and what cold starts read first.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::{ensure_finite, read_if_exists, sanitize_room_id, write_replace, StoreError};
use crate::op::{now_millis, StrokeOp};

/// Checkpoint document: `{timestamp, ops}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Milliseconds since the Unix epoch at save time
    pub timestamp: u64,
    #[serde(default)]
    pub ops: Vec<StrokeOp>,
}

#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn checkpoint_file(&self, room_id: &str) -> PathBuf {
        self.dir
            .join(format!("checkpoint-{}.json", sanitize_room_id(room_id)))
    }

    /// Ops of the latest checkpoint, `None` when absent or unreadable.
    pub fn load(&self, room_id: &str) -> Option<Vec<StrokeOp>> {
        self.load_checkpoint(room_id).map(|cp| cp.ops)
    }

    /// Full checkpoint document, `None` when absent or unreadable.
    pub fn load_checkpoint(&self, room_id: &str) -> Option<Checkpoint> {
        let path = self.checkpoint_file(room_id);
        let parsed = read_if_exists(&path).and_then(|text| match text {
            Some(text) => Ok(Some(serde_json::from_str::<Checkpoint>(&text)?)),
            None => Ok(None),
        });

        match parsed {
            Ok(cp) => cp,
            Err(e) => {
                log::error!("[checkpoint] load failed for room {room_id:?}: {e}");
                None
            }
        }
    }

    /// Write a snapshot of `ops` stamped with the current time.
    pub fn save(&self, room_id: &str, ops: &[StrokeOp]) -> Result<Checkpoint, StoreError> {
        ensure_finite(ops)?;
        let checkpoint = Checkpoint {
            timestamp: now_millis(),
            ops: ops.to_vec(),
        };
        let json = serde_json::to_vec_pretty(&checkpoint)?;
        write_replace(&self.checkpoint_file(room_id), &json)?;
        log::info!(
            "[checkpoint] saved {} ops for room {room_id:?}",
            checkpoint.ops.len()
        );
        Ok(checkpoint)
    }
}
