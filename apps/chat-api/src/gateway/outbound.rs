//! Bounded per-connection send queue with a drop-newest overflow policy.
//!
//! Many producers (broadcasts, direct sends, the connection's own replies)
//! feed one consumer, the connection's write loop. Producers never wait:
//! a full queue drops the frame for that recipient only.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::extract::ws::Utf8Bytes;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Outcome of offering a frame to a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueue {
    Queued,
    /// Queue full; the frame was discarded.
    Dropped,
    /// The write loop is gone; nobody will drain this queue.
    Closed,
}

#[derive(Clone)]
pub struct OutboundSender {
    tx: mpsc::Sender<Utf8Bytes>,
    dropped: Arc<AtomicU64>,
}

pub struct OutboundReceiver {
    rx: mpsc::Receiver<Utf8Bytes>,
}

pub fn channel(capacity: usize) -> (OutboundSender, OutboundReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        OutboundSender {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        },
        OutboundReceiver { rx },
    )
}

impl OutboundSender {
    /// Non-blocking enqueue.
    pub fn offer(&self, frame: Utf8Bytes) -> Enqueue {
        match self.tx.try_send(frame) {
            Ok(()) => Enqueue::Queued,
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                Enqueue::Dropped
            }
            Err(TrySendError::Closed(_)) => Enqueue::Closed,
        }
    }

    /// Frames discarded because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl OutboundReceiver {
    pub async fn recv(&mut self) -> Option<Utf8Bytes> {
        self.rx.recv().await
    }

    /// Refuse further frames; already queued ones can still be drained.
    pub fn close(&mut self) {
        self.rx.close();
    }

    pub fn try_recv(&mut self) -> Option<Utf8Bytes> {
        self.rx.try_recv().ok()
    }
}
