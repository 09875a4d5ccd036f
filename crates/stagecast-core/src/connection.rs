//! Connection identity and the per-connection outbound queue.
//!
//! Each live transport session is addressed by a [`ConnectionId`] and
//! drained by its own socket task through a bounded [`Outbound`] queue.
//! The queue is the decoupling point required by the delivery model: a
//! stalled client fills its own queue and gets disconnected instead of
//! slowing fan-out to everyone else.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;

use stagecast_protocol::Frame;

/// Counter mixed into generated ids so two connections accepted in the
/// same nanosecond still get distinct ids.
static CONN_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Unique identifier for a live connection. Process-lifetime only; ids
/// are never reused within a run and never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Wrap an existing id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh process-unique id.
    #[must_use]
    pub fn generate() -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos() as u64;
        let seq = CONN_COUNTER.fetch_add(1, Ordering::Relaxed);
        Self(format!("c-{nanos:x}-{seq:x}"))
    }

    /// The id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ConnectionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Outcome of pushing a frame onto a connection's outbound queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deliver {
    /// Frame queued for delivery.
    Queued,
    /// The connection is gone; frame dropped. Expected race, not an error.
    Gone,
    /// The queue is full. The connection is too slow to keep up and
    /// should be disconnected.
    Overflow,
}

/// Sending half of a connection's bounded outbound queue.
///
/// Frames are reference-counted so one fan-out encodes a frame once and
/// queues it to every recipient without copying.
#[derive(Debug, Clone)]
pub struct Outbound {
    tx: mpsc::Sender<Arc<Frame>>,
}

impl Outbound {
    /// Create an outbound queue of the given depth, returning the sending
    /// half and the receiver the socket task drains.
    #[must_use]
    pub fn channel(depth: usize) -> (Self, mpsc::Receiver<Arc<Frame>>) {
        let (tx, rx) = mpsc::channel(depth.max(1));
        (Self { tx }, rx)
    }

    /// Push a frame without blocking.
    pub fn push(&self, frame: Arc<Frame>) -> Deliver {
        match self.tx.try_send(frame) {
            Ok(()) => Deliver::Queued,
            Err(mpsc::error::TrySendError::Closed(_)) => Deliver::Gone,
            Err(mpsc::error::TrySendError::Full(_)) => Deliver::Overflow,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids_are_unique() {
        let a = ConnectionId::generate();
        let b = ConnectionId::generate();
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("c-"));
    }

    #[test]
    fn test_push_outcomes() {
        let (out, mut rx) = Outbound::channel(1);

        assert_eq!(out.push(Arc::new(Frame::ack(1))), Deliver::Queued);
        assert_eq!(out.push(Arc::new(Frame::ack(2))), Deliver::Overflow);

        assert!(rx.try_recv().is_ok());
        drop(rx);
        assert_eq!(out.push(Arc::new(Frame::ack(3))), Deliver::Gone);
    }
}
