//! Durable full-log store: one JSON array of `StrokeOp` per room.

use std::path::{Path, PathBuf};

use super::{ensure_finite, read_if_exists, sanitize_room_id, write_replace, StoreError};
use crate::op::StrokeOp;

/// Always-current copy of every room's committed operations.
#[derive(Debug, Clone)]
pub struct LogStore {
    dir: PathBuf,
}

impl LogStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the log document for a room.
    pub fn room_file(&self, room_id: &str) -> PathBuf {
        self.dir.join(format!("canvas-{}.json", sanitize_room_id(room_id)))
    }

    /// Load a room's log in insertion order.
    ///
    /// Absent, unreadable, corrupt or non-array documents all load as empty.
    pub fn load(&self, room_id: &str) -> Vec<StrokeOp> {
        match self.try_load(room_id) {
            Ok(ops) => ops.unwrap_or_default(),
            Err(e) => {
                log::error!("[persistence] load failed for room {room_id:?}: {e}");
                Vec::new()
            }
        }
    }

    /// Load, distinguishing "absent" (`Ok(None)`) from failures.
    pub fn try_load(&self, room_id: &str) -> Result<Option<Vec<StrokeOp>>, StoreError> {
        match read_if_exists(&self.room_file(room_id))? {
            Some(text) => Ok(Some(serde_json::from_str(&text)?)),
            None => Ok(None),
        }
    }

    /// Overwrite a room's log with `ops`. The previous document is kept
    /// when any op is not finite.
    pub fn save(&self, room_id: &str, ops: &[StrokeOp]) -> Result<(), StoreError> {
        ensure_finite(ops)?;
        let json = serde_json::to_vec_pretty(ops)?;
        write_replace(&self.room_file(room_id), &json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::op::{Point, StrokeStyle, TempStroke};
    use std::fs;
    use uuid::Uuid;

    fn sample_ops(n: u64) -> Vec<StrokeOp> {
        (1..=n)
            .map(|seq| {
                let mut temp = TempStroke::new(
                    Uuid::new_v4(),
                    StrokeStyle::brush("#336699", 3.0),
                    Point::new(0.0, 0.0, seq),
                );
                temp.points.push(Point::new(seq as f32, 2.0 * seq as f32, seq + 1));
                let mut op = temp.into_op(Uuid::new_v4(), seq);
                op.active = seq % 2 == 1;
                op
            })
            .collect()
    }

    #[test]
    fn test_roundtrip_preserves_order_and_fields() {
        let dir = tempfile::tempdir().unwrap();
        let store = LogStore::new(dir.path());
        let ops = sample_ops(6);

        store.save("lobby", &ops).unwrap();
        let loaded = store.load("lobby");

        assert_eq!(loaded, ops);
    }

    #[test]
    fn test_missing_room_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = LogStore::new(dir.path());
        assert!(store.load("nobody-here").is_empty());
        assert!(store.try_load("nobody-here").unwrap().is_none());
    }

    #[test]
    fn test_corrupt_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = LogStore::new(dir.path());
        fs::write(store.room_file("broken"), "{ not json at all").unwrap();

        assert!(store.load("broken").is_empty());
        assert!(store.try_load("broken").is_err());
    }

    #[test]
    fn test_non_array_document_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = LogStore::new(dir.path());
        fs::write(store.room_file("object"), r#"{"ops": []}"#).unwrap();

        assert!(store.load("object").is_empty());
    }

    #[test]
    fn test_room_ids_are_sanitized_into_file_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = LogStore::new(dir.path());

        store.save("a/b c", &sample_ops(1)).unwrap();

        assert!(dir.path().join("canvas-a_b_c.json").exists());
        assert_eq!(store.load("a/b c").len(), 1);
    }

    #[test]
    fn test_save_into_unwritable_root_fails() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        fs::write(&blocker, "file").unwrap();
        let store = LogStore::new(&blocker);

        assert!(store.save("lobby", &sample_ops(1)).is_err());
        assert!(store.load("lobby").is_empty());
    }

    #[test]
    fn test_non_finite_op_is_refused_and_previous_log_kept() {
        let dir = tempfile::tempdir().unwrap();
        let store = LogStore::new(dir.path());
        let ops = sample_ops(2);
        store.save("lobby", &ops).unwrap();

        let mut poisoned = ops.clone();
        poisoned[1].points.push(Point::new(f32::NAN, 1.0, 9));
        let err = store.save("lobby", &poisoned).unwrap_err();

        assert!(matches!(err, StoreError::NonFinite { op_id } if op_id == ops[1].op_id));
        assert_eq!(store.load("lobby"), ops);
    }
}
