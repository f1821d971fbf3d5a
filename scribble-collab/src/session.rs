//! Per-room operation log engine.
//!
//! ```text
//!  start_temp ──► temp[(conn, temp_id)] ──► append_temp* ──► commit_temp
//!                                                               │
//!                                     ops.push(op, seq = ++seq) ◄┘
//!                                               │
//!                       LogStore.save (always) ─┤
//!           CheckpointStore.save (every N ops) ─┘
//!
//!  toggle_last_active   (undo): newest active op   → inactive, seq = ++seq
//!  toggle_last_inactive (redo): newest inactive op → active,   seq = ++seq
//! ```
//!
//! The undo stack is global to the room: undo deactivates the most recent
//! active op whoever drew it.
//!
//! `RoomSession` is a plain state machine (`&mut self`); the owning `Room`
//! serializes access to it.

use std::collections::HashMap;
use uuid::Uuid;

use crate::op::{
    ConnectionId, OpId, ParticipantId, Point, StagingKey, StrokeOp, StrokeStyle, TempStroke,
};
use crate::storage::{Checkpoint, CheckpointStore, LogStore};

/// Session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Save a checkpoint whenever the log length is a multiple of this.
    /// Zero disables checkpointing.
    pub checkpoint_interval: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            checkpoint_interval: 5,
        }
    }
}

/// Counters for monitoring a session, including storage failures.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub op_count: usize,
    pub active_count: usize,
    pub pending_temps: usize,
    pub seq: u64,
    pub saves: u64,
    pub save_failures: u64,
    pub checkpoints: u64,
}

/// Authoritative drawing state of one room.
pub struct RoomSession {
    room_id: String,
    /// Committed ops in insertion order; entries are toggled, never removed
    ops: Vec<StrokeOp>,
    seq_counter: u64,
    temp: HashMap<StagingKey, TempStroke>,
    log_store: LogStore,
    checkpoints: CheckpointStore,
    config: SessionConfig,
    saves: u64,
    save_failures: u64,
    checkpoints_written: u64,
}

impl RoomSession {
    /// Open a room, restoring its log from storage.
    ///
    /// Reads the checkpoint first; ops the durable log committed after that
    /// checkpoint are appended. Without a checkpoint the durable log is used
    /// as is. Storage problems degrade to an empty log.
    pub fn open(
        room_id: impl Into<String>,
        log_store: LogStore,
        checkpoints: CheckpointStore,
        config: SessionConfig,
    ) -> Self {
        let room_id = room_id.into();

        let ops = match checkpoints.load(&room_id) {
            Some(snapshot) => {
                let from_checkpoint = snapshot.len();
                let ops = catch_up(snapshot, log_store.load(&room_id));
                log::info!(
                    "Room {room_id:?} restored {} ops ({from_checkpoint} from checkpoint)",
                    ops.len()
                );
                ops
            }
            None => {
                let ops = log_store.load(&room_id);
                if !ops.is_empty() {
                    log::info!("Room {room_id:?} restored {} ops from log", ops.len());
                }
                ops
            }
        };

        Self::from_ops(room_id, ops, log_store, checkpoints, config)
    }

    /// Build a session over an already-loaded log.
    pub fn from_ops(
        room_id: impl Into<String>,
        ops: Vec<StrokeOp>,
        log_store: LogStore,
        checkpoints: CheckpointStore,
        config: SessionConfig,
    ) -> Self {
        let seq_counter = ops.iter().map(|op| op.seq).max().unwrap_or(0);
        Self {
            room_id: room_id.into(),
            ops,
            seq_counter,
            temp: HashMap::new(),
            log_store,
            checkpoints,
            config,
            saves: 0,
            save_failures: 0,
            checkpoints_written: 0,
        }
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    /// Stage a new stroke. An existing stroke under the same key is replaced.
    ///
    /// Returns `false`, staging nothing, when the width or the first point
    /// is not finite.
    pub fn start_temp(
        &mut self,
        conn: ConnectionId,
        temp_id: &str,
        author_id: ParticipantId,
        style: StrokeStyle,
        first_point: Point,
    ) -> bool {
        if !style.is_valid() || !first_point.is_finite() {
            log::debug!(
                "rejected stroke {temp_id:?} in room {:?}: invalid width or point",
                self.room_id
            );
            return false;
        }
        self.temp.insert(
            StagingKey::new(conn, temp_id),
            TempStroke::new(author_id, style, first_point),
        );
        true
    }

    /// Extend a staged stroke. Unknown keys are ignored, and a batch with
    /// any non-finite point is dropped whole.
    ///
    /// Returns whether a staged stroke was extended.
    pub fn append_temp(&mut self, conn: ConnectionId, temp_id: &str, points: &[Point]) -> bool {
        if !points.iter().all(Point::is_finite) {
            log::debug!(
                "rejected append to {temp_id:?} in room {:?}: non-finite point",
                self.room_id
            );
            return false;
        }
        match self.temp.get_mut(&StagingKey::new(conn, temp_id)) {
            Some(stroke) => {
                stroke.points.extend_from_slice(points);
                true
            }
            None => {
                log::trace!("append for unknown stroke {temp_id:?} in room {:?}", self.room_id);
                false
            }
        }
    }

    /// Commit a staged stroke into the log.
    ///
    /// Returns `None` when nothing is staged under the key (already
    /// committed, never started, or abandoned).
    pub fn commit_temp(&mut self, conn: ConnectionId, temp_id: &str) -> Option<StrokeOp> {
        let stroke = self.temp.remove(&StagingKey::new(conn, temp_id))?;

        self.seq_counter += 1;
        let op = stroke.into_op(self.fresh_op_id(), self.seq_counter);
        self.ops.push(op.clone());
        self.persist();

        let interval = self.config.checkpoint_interval;
        if interval > 0 && self.ops.len() % interval == 0 {
            log::info!(
                "[checkpoint] Room {:?} reached {} ops, saving checkpoint",
                self.room_id,
                self.ops.len()
            );
            self.checkpoint();
        }

        Some(op)
    }

    /// Undo: deactivate the most recent active op, regardless of author.
    pub fn toggle_last_active(&mut self) -> Option<StrokeOp> {
        self.toggle_last(true)
    }

    /// Redo: reactivate the most recent inactive op.
    pub fn toggle_last_inactive(&mut self) -> Option<StrokeOp> {
        self.toggle_last(false)
    }

    fn toggle_last(&mut self, currently_active: bool) -> Option<StrokeOp> {
        let idx = self
            .ops
            .iter()
            .rposition(|op| op.active == currently_active)?;

        self.seq_counter += 1;
        let seq = self.seq_counter;
        let op = &mut self.ops[idx];
        op.active = !currently_active;
        op.seq = seq;
        let toggled = op.clone();

        self.persist();
        Some(toggled)
    }

    /// Copy of the log in insertion order (not sorted by seq).
    pub fn timeline(&self) -> Vec<StrokeOp> {
        self.ops.clone()
    }

    /// Drop every stroke a connection left staged.
    pub fn abandon_connection(&mut self, conn: ConnectionId) -> usize {
        let before = self.temp.len();
        self.temp.retain(|key, _| key.conn != conn);
        before - self.temp.len()
    }

    /// Staged stroke under a key, if any.
    pub fn pending(&self, conn: ConnectionId, temp_id: &str) -> Option<&TempStroke> {
        self.temp.get(&StagingKey::new(conn, temp_id))
    }

    /// Latest checkpoint document of this room, read from disk.
    pub fn latest_checkpoint(&self) -> Option<Checkpoint> {
        self.checkpoints.load_checkpoint(&self.room_id)
    }

    /// Current value of the seq counter.
    pub fn seq(&self) -> u64 {
        self.seq_counter
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            op_count: self.ops.len(),
            active_count: self.ops.iter().filter(|op| op.active).count(),
            pending_temps: self.temp.len(),
            seq: self.seq_counter,
            saves: self.saves,
            save_failures: self.save_failures,
            checkpoints: self.checkpoints_written,
        }
    }

    fn fresh_op_id(&self) -> OpId {
        loop {
            let id = Uuid::new_v4();
            if !self.ops.iter().any(|op| op.op_id == id) {
                return id;
            }
        }
    }

    /// Rewrite the full log. Failures leave the in-memory log authoritative.
    fn persist(&mut self) {
        match self.log_store.save(&self.room_id, &self.ops) {
            Ok(()) => self.saves += 1,
            Err(e) => {
                self.save_failures += 1;
                log::error!("[persistence] save failed for room {:?}: {e}", self.room_id);
            }
        }
    }

    fn checkpoint(&mut self) {
        match self.checkpoints.save(&self.room_id, &self.ops) {
            Ok(_) => self.checkpoints_written += 1,
            Err(e) => {
                self.save_failures += 1;
                log::error!("[checkpoint] save failed for room {:?}: {e}", self.room_id);
            }
        }
    }
}

/// Extend a checkpoint with whatever the durable log committed since.
///
/// Ops missing from the checkpoint are appended in log order; ops present in
/// both take the log version when its seq is higher.
fn catch_up(mut base: Vec<StrokeOp>, log: Vec<StrokeOp>) -> Vec<StrokeOp> {
    let mut index: HashMap<OpId, usize> = base
        .iter()
        .enumerate()
        .map(|(i, op)| (op.op_id, i))
        .collect();

    for op in log {
        match index.get(&op.op_id) {
            Some(&i) => {
                if op.seq > base[i].seq {
                    base[i] = op;
                }
            }
            None => {
                index.insert(op.op_id, base.len());
                base.push(op);
            }
        }
    }
    base
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StoreConfig;
    use std::collections::HashSet;
    use std::fs;

    fn session_in(dir: &std::path::Path) -> RoomSession {
        let (log, checkpoints) = StoreConfig::new(dir).open();
        RoomSession::open("lobby", log, checkpoints, SessionConfig::default())
    }

    fn draw(
        session: &mut RoomSession,
        conn: ConnectionId,
        author: ParticipantId,
        temp_id: &str,
    ) -> StrokeOp {
        let style = StrokeStyle::brush("#ff0000", 4.0);
        assert!(session.start_temp(conn, temp_id, author, style, Point::new(0.0, 0.0, 1)));
        session.append_temp(conn, temp_id, &[Point::new(1.0, 1.0, 2), Point::new(2.0, 2.0, 3)]);
        session.commit_temp(conn, temp_id).unwrap()
    }

    fn stroke_at(seq: u64) -> StrokeOp {
        let style = StrokeStyle::brush("#000", 1.0);
        TempStroke::new(Uuid::new_v4(), style, Point::new(0.0, 0.0, 0)).into_op(Uuid::new_v4(), seq)
    }

    #[test]
    fn test_commit_assigns_increasing_seq_and_unique_ids() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session_in(dir.path());
        let conn = Uuid::new_v4();
        let author = Uuid::new_v4();

        let ops: Vec<StrokeOp> = (0..20)
            .map(|i| draw(&mut session, conn, author, &format!("t{i}")))
            .collect();

        assert!(ops.windows(2).all(|w| w[0].seq < w[1].seq));
        let ids: HashSet<OpId> = ops.iter().map(|op| op.op_id).collect();
        assert_eq!(ids.len(), ops.len());
    }

    #[test]
    fn test_commit_builds_op_from_staged_points() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session_in(dir.path());
        let conn = Uuid::new_v4();
        let author = Uuid::new_v4();

        let op = draw(&mut session, conn, author, "t1");

        assert_eq!(op.points.len(), 3);
        assert_eq!(op.author_id, author);
        assert_eq!(op.seq, 1);
        assert!(op.active);
        assert!(session.pending(conn, "t1").is_none());
    }

    #[test]
    fn test_double_commit_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session_in(dir.path());
        let conn = Uuid::new_v4();

        draw(&mut session, conn, Uuid::new_v4(), "t1");
        assert!(session.commit_temp(conn, "t1").is_none());
        assert!(session.commit_temp(conn, "never-started").is_none());
        assert_eq!(session.timeline().len(), 1);
        assert_eq!(session.seq(), 1);
    }

    #[test]
    fn test_append_unknown_temp_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session_in(dir.path());
        let conn = Uuid::new_v4();

        assert!(!session.append_temp(conn, "ghost", &[Point::new(1.0, 1.0, 1)]));

        assert!(session.pending(conn, "ghost").is_none());
        assert_eq!(session.stats().pending_temps, 0);
    }

    #[test]
    fn test_non_finite_input_is_never_staged() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session_in(dir.path());
        let conn = Uuid::new_v4();
        let author = Uuid::new_v4();
        let brush = StrokeStyle::brush("#123", 2.0);

        let nan_start = Point::new(f32::NAN, 1.0, 1);
        assert!(!session.start_temp(conn, "a", author, brush.clone(), nan_start));
        let inf_width = StrokeStyle::brush("#123", f32::INFINITY);
        assert!(!session.start_temp(conn, "b", author, inf_width, Point::new(0.0, 0.0, 1)));
        assert!(session.commit_temp(conn, "a").is_none());
        assert!(session.commit_temp(conn, "b").is_none());

        assert!(session.start_temp(conn, "c", author, brush, Point::new(0.0, 0.0, 1)));
        let batch = [Point::new(1.0, 1.0, 2), Point::new(2.0, f32::NEG_INFINITY, 3)];
        assert!(!session.append_temp(conn, "c", &batch));
        assert_eq!(session.pending(conn, "c").unwrap().points.len(), 1);
    }

    #[test]
    fn test_rejected_nan_stroke_leaves_log_reloadable() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session_in(dir.path());
        let conn = Uuid::new_v4();
        let author = Uuid::new_v4();
        for i in 0..3 {
            draw(&mut session, conn, author, &format!("t{i}"));
        }

        let brush = StrokeStyle::brush("#ff0000", 4.0);
        session.start_temp(conn, "nan", author, brush, Point::new(0.0, 0.0, 1));
        session.append_temp(conn, "nan", &[Point::new(f32::NAN, 1.0, 1)]);
        session.commit_temp(conn, "nan");

        let committed = session.timeline();
        assert_eq!(session.stats().save_failures, 0);
        drop(session);

        let reopened = session_in(dir.path());
        assert_eq!(reopened.timeline(), committed);
        assert!(reopened.timeline().iter().all(StrokeOp::is_finite));
    }

    #[test]
    fn test_restart_overwrites_staged_stroke() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session_in(dir.path());
        let conn = Uuid::new_v4();
        let author = Uuid::new_v4();

        let brush = StrokeStyle::brush("#111", 1.0);
        session.start_temp(conn, "t1", author, brush, Point::new(0.0, 0.0, 1));
        session.append_temp(conn, "t1", &[Point::new(5.0, 5.0, 2)]);
        let eraser = StrokeStyle::eraser(9.0);
        session.start_temp(conn, "t1", author, eraser, Point::new(7.0, 7.0, 3));

        let staged = session.pending(conn, "t1").unwrap();
        assert_eq!(staged.points, vec![Point::new(7.0, 7.0, 3)]);
        assert_eq!(staged.style, StrokeStyle::eraser(9.0));
    }

    #[test]
    fn test_same_temp_id_on_two_connections() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session_in(dir.path());
        let (conn_a, conn_b) = (Uuid::new_v4(), Uuid::new_v4());
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());

        let (red, green) = (StrokeStyle::brush("#a00", 2.0), StrokeStyle::brush("#0b0", 2.0));
        session.start_temp(conn_a, "same", alice, red, Point::new(0.0, 0.0, 1));
        session.start_temp(conn_b, "same", bob, green, Point::new(9.0, 9.0, 1));
        session.append_temp(conn_a, "same", &[Point::new(1.0, 0.0, 2)]);

        let a = session.commit_temp(conn_a, "same").unwrap();
        let b = session.commit_temp(conn_b, "same").unwrap();

        assert_ne!(a.op_id, b.op_id);
        assert_eq!(a.author_id, alice);
        assert_eq!(b.author_id, bob);
        assert_eq!(a.points.len(), 2);
        assert_eq!(b.points.len(), 1);
    }

    #[test]
    fn test_eraser_commits_as_erase() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session_in(dir.path());
        let conn = Uuid::new_v4();

        let eraser = StrokeStyle::eraser(20.0);
        session.start_temp(conn, "e", Uuid::new_v4(), eraser, Point::new(0.0, 0.0, 1));
        let op = session.commit_temp(conn, "e").unwrap();

        assert_eq!(op.kind, crate::op::OpKind::Erase);
    }

    #[test]
    fn test_undo_then_redo_restores_with_higher_seq() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session_in(dir.path());
        let conn = Uuid::new_v4();
        let committed = draw(&mut session, conn, Uuid::new_v4(), "t1");

        let undone = session.toggle_last_active().unwrap();
        let redone = session.toggle_last_inactive().unwrap();

        assert_eq!(undone.op_id, committed.op_id);
        assert!(!undone.active);
        assert_eq!(redone.op_id, committed.op_id);
        assert!(redone.active);
        assert!(redone.seq > undone.seq && undone.seq > committed.seq);
    }

    #[test]
    fn test_undo_with_nothing_active_leaves_seq() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session_in(dir.path());
        assert!(session.toggle_last_active().is_none());
        assert_eq!(session.seq(), 0);

        draw(&mut session, Uuid::new_v4(), Uuid::new_v4(), "t1");
        session.toggle_last_active().unwrap();
        let seq = session.seq();

        assert!(session.toggle_last_active().is_none());
        assert_eq!(session.seq(), seq);
        assert!(session.toggle_last_inactive().is_some());
        assert!(session.toggle_last_inactive().is_none());
    }

    #[test]
    fn test_undo_is_global_across_authors() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session_in(dir.path());
        let (conn_a, conn_b) = (Uuid::new_v4(), Uuid::new_v4());
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());

        let op1 = draw(&mut session, conn_a, alice, "a1");
        let op2 = draw(&mut session, conn_b, bob, "b1");
        assert_eq!((op1.seq, op2.seq), (1, 2));

        // Alice's undo hits Bob's stroke.
        let undone = session.toggle_last_active().unwrap();
        assert_eq!(undone.op_id, op2.op_id);
        assert_eq!(undone.seq, 3);

        // Bob's redo brings it back on top.
        let redone = session.toggle_last_inactive().unwrap();
        assert_eq!(redone.op_id, op2.op_id);
        assert_eq!(redone.seq, 4);

        let mut timeline = session.timeline();
        timeline.sort_by_key(|op| op.seq);
        let order: Vec<OpId> = timeline
            .iter()
            .filter(|op| op.active)
            .map(|op| op.op_id)
            .collect();
        assert_eq!(order, vec![op1.op_id, op2.op_id]);
    }

    #[test]
    fn test_timeline_is_insertion_order_copy() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session_in(dir.path());
        let conn = Uuid::new_v4();
        let first = draw(&mut session, conn, Uuid::new_v4(), "t1");
        let second = draw(&mut session, conn, Uuid::new_v4(), "t2");

        // Undo both, then redo both: `first` ends up with the highest seq.
        session.toggle_last_active().unwrap();
        session.toggle_last_active().unwrap();
        session.toggle_last_inactive().unwrap();
        session.toggle_last_inactive().unwrap();

        let mut timeline = session.timeline();
        assert_eq!(timeline[0].op_id, first.op_id);
        assert_eq!(timeline[1].op_id, second.op_id);
        assert!(timeline[0].seq > timeline[1].seq);

        timeline[0].points.clear();
        timeline[0].active = false;
        assert_eq!(session.timeline()[0].points.len(), 3);
    }

    #[test]
    fn test_every_mutation_persists_full_log() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session_in(dir.path());
        let conn = Uuid::new_v4();
        draw(&mut session, conn, Uuid::new_v4(), "t1");
        draw(&mut session, conn, Uuid::new_v4(), "t2");
        session.toggle_last_active().unwrap();

        let (log, _) = StoreConfig::new(dir.path()).open();
        assert_eq!(log.load("lobby"), session.timeline());
        assert_eq!(session.stats().saves, 3);
    }

    #[test]
    fn test_checkpoint_every_interval() {
        let dir = tempfile::tempdir().unwrap();
        let (log, checkpoints) = StoreConfig::new(dir.path()).open();
        let mut session = RoomSession::open(
            "lobby",
            log,
            checkpoints.clone(),
            SessionConfig { checkpoint_interval: 3 },
        );
        let conn = Uuid::new_v4();

        draw(&mut session, conn, Uuid::new_v4(), "t1");
        draw(&mut session, conn, Uuid::new_v4(), "t2");
        assert!(checkpoints.load("lobby").is_none());

        draw(&mut session, conn, Uuid::new_v4(), "t3");
        assert_eq!(checkpoints.load("lobby").unwrap().len(), 3);

        // Toggles never checkpoint.
        session.toggle_last_active().unwrap();
        assert!(checkpoints.load("lobby").unwrap().iter().all(|op| op.active));

        for i in 4..=6 {
            draw(&mut session, conn, Uuid::new_v4(), &format!("t{i}"));
        }
        assert_eq!(checkpoints.load("lobby").unwrap().len(), 6);
        assert_eq!(session.stats().checkpoints, 2);
    }

    #[test]
    fn test_save_failure_keeps_memory_authoritative() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocked");
        fs::write(&blocker, "not a directory").unwrap();
        let mut session = session_in(&blocker);
        let conn = Uuid::new_v4();

        let op = draw(&mut session, conn, Uuid::new_v4(), "t1");
        let undone = session.toggle_last_active().unwrap();

        assert_eq!(undone.op_id, op.op_id);
        assert_eq!(session.timeline().len(), 1);
        let stats = session.stats();
        assert_eq!(stats.saves, 0);
        assert_eq!(stats.save_failures, 2);
    }

    #[test]
    fn test_open_restores_seq_counter() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut session = session_in(dir.path());
            let conn = Uuid::new_v4();
            draw(&mut session, conn, Uuid::new_v4(), "t1");
            draw(&mut session, conn, Uuid::new_v4(), "t2");
            session.toggle_last_active().unwrap();
        }

        let mut reopened = session_in(dir.path());
        assert_eq!(reopened.seq(), 3);
        assert_eq!(reopened.stats().active_count, 1);

        let op = draw(&mut reopened, Uuid::new_v4(), Uuid::new_v4(), "t3");
        assert_eq!(op.seq, 4);
    }

    #[test]
    fn test_open_prefers_checkpoint_and_catches_up_from_log() {
        let dir = tempfile::tempdir().unwrap();
        let (log, checkpoints) = StoreConfig::new(dir.path()).open();
        let expected = {
            let mut session = RoomSession::open(
                "lobby",
                log.clone(),
                checkpoints.clone(),
                SessionConfig { checkpoint_interval: 2 },
            );
            let conn = Uuid::new_v4();
            draw(&mut session, conn, Uuid::new_v4(), "t1");
            draw(&mut session, conn, Uuid::new_v4(), "t2");
            draw(&mut session, conn, Uuid::new_v4(), "t3");
            session.toggle_last_active().unwrap();
            session.toggle_last_active().unwrap();
            session.timeline()
        };
        assert_eq!(checkpoints.load("lobby").unwrap().len(), 2);

        let reopened = RoomSession::open("lobby", log, checkpoints, SessionConfig::default());
        assert_eq!(reopened.timeline(), expected);
        assert_eq!(reopened.seq(), 5);
    }

    #[test]
    fn test_open_with_checkpoint_only() {
        let dir = tempfile::tempdir().unwrap();
        let (log, checkpoints) = StoreConfig::new(dir.path()).open();
        let op = stroke_at(9);
        checkpoints.save("lobby", &[op.clone()]).unwrap();
        fs::write(log.room_file("lobby"), "garbage").unwrap();

        let session = RoomSession::open("lobby", log, checkpoints, SessionConfig::default());
        assert_eq!(session.timeline(), vec![op]);
        assert_eq!(session.seq(), 9);
    }

    #[test]
    fn test_corrupt_log_opens_empty() {
        let dir = tempfile::tempdir().unwrap();
        let (log, _) = StoreConfig::new(dir.path()).open();
        fs::write(log.room_file("lobby"), "[{\"op_id\": 12}").unwrap();

        let session = session_in(dir.path());
        assert!(session.timeline().is_empty());
        assert_eq!(session.seq(), 0);
    }

    #[test]
    fn test_abandon_connection_drops_only_its_strokes() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session_in(dir.path());
        let (conn_a, conn_b) = (Uuid::new_v4(), Uuid::new_v4());
        let style = StrokeStyle::brush("#000", 1.0);

        session.start_temp(conn_a, "x", Uuid::new_v4(), style.clone(), Point::new(0.0, 0.0, 0));
        session.start_temp(conn_a, "y", Uuid::new_v4(), style.clone(), Point::new(0.0, 0.0, 0));
        session.start_temp(conn_b, "x", Uuid::new_v4(), style, Point::new(0.0, 0.0, 0));

        assert_eq!(session.abandon_connection(conn_a), 2);
        assert!(session.commit_temp(conn_a, "x").is_none());
        assert!(session.commit_temp(conn_b, "x").is_some());
        assert_eq!(session.seq(), 1);
    }

    #[test]
    fn test_catch_up_keeps_fresher_version() {
        let base_op = stroke_at(1);
        let mut toggled = base_op.clone();
        toggled.active = false;
        toggled.seq = 3;
        let newer = stroke_at(2);

        let merged = catch_up(vec![base_op.clone()], vec![toggled.clone(), newer.clone()]);
        assert_eq!(merged, vec![toggled.clone(), newer.clone()]);

        // A stale log entry never overrides the checkpoint.
        let merged = catch_up(vec![toggled.clone()], vec![base_op]);
        assert_eq!(merged, vec![toggled]);
    }
}
