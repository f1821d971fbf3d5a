//! Per-room fan-out with backpressure.
//!
//! Uses a tokio broadcast channel: one encode, O(1) send to every
//! subscriber. Each connection holds its own receiver buffering up to
//! `capacity` frames; a connection that falls further behind lags and loses
//! the oldest frames.
//!
//! "Send to others" is expressed on the frame itself (`exclude`), so each
//! receiver can drop its own echoes without decoding the payload.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::op::ConnectionId;
use crate::protocol::{ProtocolError, ServerMessage};

/// An encoded server message plus its audience.
#[derive(Debug)]
pub struct Frame {
    /// Connection that must not receive this frame (the originator for
    /// "broadcast to others")
    pub exclude: Option<ConnectionId>,
    pub bytes: Vec<u8>,
}

impl Frame {
    /// Whether a connection should forward this frame.
    pub fn is_for(&self, conn: ConnectionId) -> bool {
        self.exclude != Some(conn)
    }
}

/// Statistics for monitoring broadcast health.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastStats {
    pub messages_sent: u64,
    pub messages_dropped: u64,
    pub subscribers: usize,
}

/// A broadcast group for a single room.
pub struct BroadcastGroup {
    sender: broadcast::Sender<Arc<Frame>>,
    capacity: usize,
    messages_sent: AtomicU64,
    messages_dropped: AtomicU64,
}

impl BroadcastGroup {
    /// Create a group buffering up to `capacity` frames per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            capacity,
            messages_sent: AtomicU64::new(0),
            messages_dropped: AtomicU64::new(0),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Frame>> {
        self.sender.subscribe()
    }

    /// Send to every subscriber. Returns the number of receivers reached.
    pub fn broadcast_all(&self, msg: &ServerMessage) -> Result<usize, ProtocolError> {
        self.send(None, msg)
    }

    /// Send to every subscriber except `origin`.
    pub fn broadcast_others(
        &self,
        origin: ConnectionId,
        msg: &ServerMessage,
    ) -> Result<usize, ProtocolError> {
        self.send(Some(origin), msg)
    }

    fn send(
        &self,
        exclude: Option<ConnectionId>,
        msg: &ServerMessage,
    ) -> Result<usize, ProtocolError> {
        let frame = Arc::new(Frame {
            exclude,
            bytes: msg.encode()?,
        });
        let count = self.sender.send(frame).unwrap_or(0);
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        Ok(count)
    }

    /// Record frames a lagging subscriber skipped.
    pub fn record_lag(&self, skipped: u64) {
        self.messages_dropped.fetch_add(skipped, Ordering::Relaxed);
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_dropped: self.messages_dropped.load(Ordering::Relaxed),
            subscribers: self.subscriber_count(),
        }
    }
}
