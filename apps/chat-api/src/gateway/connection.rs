//! Shared handle to one live socket.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::Utf8Bytes;
use parking_lot::Mutex;
use tokio::sync::watch;

use chat_common::id::{prefix, prefixed_ulid};

use crate::auth::identity::Identity;

use super::events::Notification;
use super::outbound::{Enqueue, OutboundSender};

/// Why a connection is being closed; picks the close frame sent to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Client went away or the server is tearing down normally.
    Normal,
    /// The same user logged in again elsewhere.
    Replaced,
    /// No inbound activity within the liveness window.
    Idle,
    /// The socket failed; nothing more can be written.
    Transport,
}

/// `Connecting → Active → Closing → Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Active,
    Closing,
    Closed,
}

struct Inner {
    id: String,
    user_id: String,
    username: String,
    outbound: OutboundSender,
    close_tx: watch::Sender<Option<CloseReason>>,
    state: Mutex<ConnectionState>,
    last_seen: Mutex<Instant>,
}

/// Cheap-to-clone handle held by the registry, the hub and the socket loops.
///
/// Only the write loop touches the socket; everyone else goes through the
/// outbound queue or the close signal.
#[derive(Clone)]
pub struct ConnectionHandle {
    inner: Arc<Inner>,
}

impl ConnectionHandle {
    pub fn new(identity: &Identity, outbound: OutboundSender) -> Self {
        let (close_tx, _) = watch::channel(None);
        Self {
            inner: Arc::new(Inner {
                id: prefixed_ulid(prefix::CONNECTION),
                user_id: identity.user_id.clone(),
                username: identity.username.clone(),
                outbound,
                close_tx,
                state: Mutex::new(ConnectionState::Connecting),
                last_seen: Mutex::new(Instant::now()),
            }),
        }
    }

    /// Internal id, distinguishing successive connections of the same user.
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn user_id(&self) -> &str {
        &self.inner.user_id
    }

    pub fn username(&self) -> &str {
        &self.inner.username
    }

    pub fn is(&self, other: &ConnectionHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    // -- outbound -----------------------------------------------------------

    pub fn offer(&self, frame: Utf8Bytes) -> Enqueue {
        self.inner.outbound.offer(frame)
    }

    pub fn send(&self, notification: &Notification) -> Enqueue {
        self.offer(notification.encode())
    }

    pub fn dropped_frames(&self) -> u64 {
        self.inner.outbound.dropped()
    }

    // -- lifecycle ----------------------------------------------------------

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.lock()
    }

    /// `Connecting → Active`. False if the connection already left `Connecting`.
    pub fn activate(&self) -> bool {
        let mut state = self.inner.state.lock();
        if *state == ConnectionState::Connecting {
            *state = ConnectionState::Active;
            true
        } else {
            false
        }
    }

    /// Ask both socket loops to stop. Idempotent: the first reason sticks,
    /// and only the call that initiated the close returns true.
    pub fn close(&self, reason: CloseReason) -> bool {
        {
            let mut state = self.inner.state.lock();
            if *state != ConnectionState::Closed {
                *state = ConnectionState::Closing;
            }
        }
        self.inner.close_tx.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(reason);
            true
        })
    }

    pub fn is_closing(&self) -> bool {
        self.inner.close_tx.borrow().is_some()
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        *self.inner.close_tx.borrow()
    }

    /// Resolves once [`close`](Self::close) has been called.
    pub async fn closed(&self) {
        let mut rx = self.inner.close_tx.subscribe();
        let _ = rx.wait_for(Option::is_some).await;
    }

    pub fn mark_closed(&self) {
        self.close(CloseReason::Normal);
        *self.inner.state.lock() = ConnectionState::Closed;
    }

    // -- liveness -----------------------------------------------------------

    /// Record inbound activity (any frame, including pongs).
    pub fn touch(&self) {
        *self.inner.last_seen.lock() = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.inner.last_seen.lock().elapsed()
    }
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.inner.id)
            .field("user_id", &self.inner.user_id)
            .field("state", &self.state())
            .finish()
    }
}
