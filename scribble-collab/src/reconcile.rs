//! Join-time reconciliation and the client-side canvas view.
//!
//! A joining client holds two overlapping sources:
//! ```text
//!   checkpoint (side channel, possibly stale) ─┐
//!                                              ├─► union ─► dedupe by op_id ─► sort by seq
//!   live timeline (Joined, insertion order)   ─┘           (higher seq wins)
//! ```
//!
//! The live log is always a superset of any checkpoint, so every checkpoint
//! op also shows up in the timeline; dedupe keeps exactly one entry per
//! `op_id`, the freshest one.
//!
//! Rendering walks the view in ascending `seq` and draws active ops: `seq`
//! is the z-order, so a redone stroke lands on top of everything drawn
//! while it was undone.

use std::collections::HashMap;

use crate::op::{OpId, StrokeOp};

/// Merge a checkpoint snapshot with the live timeline.
///
/// One entry per distinct `op_id`; when both sources carry an op, the one
/// with the higher `seq` is kept, the timeline's on a tie. Result is sorted
/// ascending by `seq`.
pub fn merge(checkpoint: Option<&[StrokeOp]>, timeline: &[StrokeOp]) -> Vec<StrokeOp> {
    let mut by_id: HashMap<OpId, StrokeOp> =
        HashMap::with_capacity(timeline.len() + checkpoint.map_or(0, |c| c.len()));

    for op in checkpoint.unwrap_or_default() {
        keep_freshest(&mut by_id, op.clone());
    }
    for op in timeline {
        keep_freshest(&mut by_id, op.clone());
    }

    let mut view: Vec<StrokeOp> = by_id.into_values().collect();
    sort_by_seq(&mut view);
    view
}

fn keep_freshest(by_id: &mut HashMap<OpId, StrokeOp>, op: StrokeOp) {
    match by_id.get(&op.op_id) {
        Some(existing) if existing.seq > op.seq => {}
        _ => {
            by_id.insert(op.op_id, op);
        }
    }
}

fn sort_by_seq(ops: &mut [StrokeOp]) {
    ops.sort_by_key(|op| op.seq);
}

/// Interface to the pixel renderer.
pub trait Surface {
    /// Reset to the blank base surface.
    fn clear(&mut self);
    /// Composite one committed op (stroke or erase) on top.
    fn draw(&mut self, op: &StrokeOp);
}

/// Clear `surface` and draw the active ops of a seq-sorted view in order.
pub fn replay<'a, S, I>(ops: I, surface: &mut S)
where
    S: Surface + ?Sized,
    I: IntoIterator<Item = &'a StrokeOp>,
{
    surface.clear();
    for op in ops.into_iter().filter(|op| op.active) {
        surface.draw(op);
    }
}

/// A client's reconciled, seq-ordered view of a room.
#[derive(Debug, Clone, Default)]
pub struct CanvasView {
    ops: Vec<StrokeOp>,
}

impl CanvasView {
    /// View from the join-time timeline alone.
    pub fn from_timeline(timeline: &[StrokeOp]) -> Self {
        Self {
            ops: merge(None, timeline),
        }
    }

    /// View from a checkpoint and the join-time timeline.
    pub fn reconcile(checkpoint: Option<&[StrokeOp]>, timeline: &[StrokeOp]) -> Self {
        Self {
            ops: merge(checkpoint, timeline),
        }
    }

    /// Fold a late-arriving checkpoint into the view.
    pub fn absorb_checkpoint(&mut self, checkpoint: &[StrokeOp]) {
        self.ops = merge(Some(checkpoint), &self.ops);
    }

    /// Record a committed op. A known `op_id` is refreshed if `op` is newer.
    pub fn apply_commit(&mut self, op: StrokeOp) {
        match self.ops.iter_mut().find(|o| o.op_id == op.op_id) {
            Some(existing) if existing.seq >= op.seq => return,
            Some(existing) => *existing = op,
            None => self.ops.push(op),
        }
        sort_by_seq(&mut self.ops);
    }

    /// Record an undo/redo. Returns `false` for unknown or stale toggles.
    pub fn apply_toggle(&mut self, op_id: OpId, active: bool, seq: u64) -> bool {
        let Some(op) = self.ops.iter_mut().find(|o| o.op_id == op_id) else {
            return false;
        };
        if op.seq >= seq {
            return false;
        }
        op.active = active;
        op.seq = seq;
        sort_by_seq(&mut self.ops);
        true
    }

    /// All ops, ascending by seq.
    pub fn ops(&self) -> &[StrokeOp] {
        &self.ops
    }

    /// Active ops in drawing order.
    pub fn render_order(&self) -> impl Iterator<Item = &StrokeOp> {
        self.ops.iter().filter(|op| op.active)
    }

    pub fn replay<S: Surface + ?Sized>(&self, surface: &mut S) {
        replay(&self.ops, surface);
    }

    pub fn get(&self, op_id: OpId) -> Option<&StrokeOp> {
        self.ops.iter().find(|op| op.op_id == op_id)
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}
