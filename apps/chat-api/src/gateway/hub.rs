//! The hub: owns the registries and pushes notifications to connections.

use std::collections::HashSet;
use std::future::Future;
use std::ops::AddAssign;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use chat_common::id::{prefix, prefixed_ulid};

use crate::config::GatewayConfig;
use crate::store::{MessageKind, NewChatMessage, PresenceStatus, StoreError, StoreGateway};

use super::connection::{CloseReason, ConnectionHandle};
use super::error::GatewayError;
use super::events::{
    action, category, wire_time, ErrorCode, Kicked, MemberChange, MessageChanged, MessageNew,
    MuteChanged, Notification, StatusChanged,
};
use super::outbound::Enqueue;
use super::registry::Registry;

/// Per-call delivery statistics. For logs and tests; never an error.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Fanout {
    pub delivered: usize,
    /// Recipient's queue was full.
    pub dropped: usize,
    /// Recipient subscribed but has no live connection or a dead queue.
    pub unreachable: usize,
}

impl AddAssign for Fanout {
    fn add_assign(&mut self, other: Self) {
        self.delivered += other.delivered;
        self.dropped += other.dropped;
        self.unreachable += other.unreachable;
    }
}

pub struct Hub {
    store: Arc<dyn StoreGateway>,
    config: GatewayConfig,
    registry: Registry,
}

impl Hub {
    pub fn new(store: Arc<dyn StoreGateway>, config: GatewayConfig) -> Self {
        Self {
            store,
            config,
            registry: Registry::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn StoreGateway> {
        &self.store
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Run a store call under the store deadline.
    pub async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        with_deadline(self.config.store_timeout, call).await
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Register a freshly handshaken connection and rebuild its subscriptions
    /// from persisted membership. Any previous connection of the same user is
    /// closed. Returns the rooms the connection ends up subscribed to.
    pub async fn connect(&self, conn: &ConnectionHandle) -> Vec<String> {
        if let Some(previous) = self.registry.connections.register(conn.clone()) {
            if !previous.is(conn) {
                tracing::info!(
                    user_id = %conn.user_id(),
                    replaced = %previous.id(),
                    "second login, closing previous connection"
                );
                previous.close(CloseReason::Replaced);
            }
        }
        conn.activate();

        let rooms = self.resync(conn).await;
        tracing::info!(
            user_id = %conn.user_id(),
            username = %conn.username(),
            connection_id = %conn.id(),
            rooms = rooms.len(),
            "connection active"
        );
        rooms
    }

    async fn resync(&self, conn: &ConnectionHandle) -> Vec<String> {
        let user_id = conn.user_id();

        if let Err(e) = self.bounded(self.store.set_online(user_id)).await {
            tracing::warn!(%e, %user_id, "failed to mark user online");
        }

        let memberships = match self.bounded(self.store.list_memberships(user_id)).await {
            Ok(rooms) => rooms,
            Err(e) => {
                tracing::warn!(%e, %user_id, "membership lookup failed, presence left stale");
                return self.registry.rooms.rooms_of(user_id);
            }
        };

        // Subscriptions inherited from a replaced connection whose membership
        // is gone.
        let wanted: HashSet<&str> = memberships.iter().map(String::as_str).collect();
        let stale: Vec<String> = self
            .registry
            .rooms
            .rooms_of(user_id)
            .into_iter()
            .filter(|room| !wanted.contains(room.as_str()))
            .collect();
        for room_id in self.registry.unsubscribe_if_current(conn, &stale) {
            self.decrement(&room_id).await;
        }

        let mut subscribed = Vec::with_capacity(memberships.len());
        for room_id in memberships {
            match self.registry.subscribe_if_current(conn, &room_id) {
                // Replaced mid-resync; the newer connection does its own.
                None => break,
                Some(true) => {
                    self.increment(&room_id).await;
                    subscribed.push(room_id);
                }
                Some(false) => subscribed.push(room_id),
            }
        }
        subscribed
    }

    /// Tear down presence for a closing connection. A connection that was
    /// already replaced leaves everything to its successor.
    pub async fn disconnect(&self, conn: &ConnectionHandle) {
        let user_id = conn.user_id();
        let Some(rooms) = self.registry.remove_if_current(conn) else {
            tracing::debug!(
                %user_id,
                connection_id = %conn.id(),
                "replaced connection closed, skipping presence cleanup"
            );
            return;
        };

        if self.registry.connections.get(user_id).is_none() {
            if let Err(e) = self.bounded(self.store.set_offline(user_id)).await {
                tracing::warn!(%e, %user_id, "failed to mark user offline");
            }
            // A new login may have marked the user online while the write above
            // was in flight.
            if self.registry.connections.get(user_id).is_some() {
                tracing::debug!(%user_id, "user reconnected during teardown, restoring online status");
                if let Err(e) = self.bounded(self.store.set_online(user_id)).await {
                    tracing::warn!(%e, %user_id, "failed to restore online status");
                }
            }
        }

        for room_id in &rooms {
            self.decrement(room_id).await;
        }

        tracing::info!(
            %user_id,
            connection_id = %conn.id(),
            rooms = rooms.len(),
            dropped_frames = conn.dropped_frames(),
            "connection closed"
        );
    }

    // -----------------------------------------------------------------------
    // Subscriptions
    // -----------------------------------------------------------------------

    /// Subscribe to a room the user holds membership in. Returns whether the
    /// subscription is new.
    pub async fn join_room(
        &self,
        conn: &ConnectionHandle,
        room_id: &str,
    ) -> Result<bool, GatewayError> {
        if !self.bounded(self.store.is_member(conn.user_id(), room_id)).await? {
            return Err(GatewayError::rejected(
                ErrorCode::NotInRoom,
                "You are not a member of this room",
            ));
        }

        match self.registry.subscribe_if_current(conn, room_id) {
            Some(true) => {
                self.increment(room_id).await;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Idempotent. Returns whether the user was subscribed.
    pub async fn leave_room(&self, conn: &ConnectionHandle, room_id: &str) -> bool {
        let left = self
            .registry
            .unsubscribe_if_current(conn, &[room_id.to_string()]);
        if left.is_empty() {
            return false;
        }
        self.decrement(room_id).await;
        true
    }

    async fn increment(&self, room_id: &str) {
        if let Err(e) = self.bounded(self.store.increment_online_count(room_id)).await {
            tracing::warn!(%e, %room_id, "failed to increment online count");
        }
    }

    async fn decrement(&self, room_id: &str) {
        if let Err(e) = self.bounded(self.store.decrement_online_count(room_id)).await {
            tracing::warn!(%e, %room_id, "failed to decrement online count");
        }
    }

    // -----------------------------------------------------------------------
    // Delivery
    // -----------------------------------------------------------------------

    /// Offer a notification to every subscriber of a room without waiting.
    pub fn broadcast_to_room(&self, room_id: &str, notification: &Notification) -> Fanout {
        let members = self.registry.rooms.members_of(room_id);
        let mut fanout = Fanout::default();
        if members.is_empty() {
            return fanout;
        }

        let frame = notification.encode();
        for user_id in &members {
            let Some(conn) = self.registry.connections.get(user_id) else {
                fanout.unreachable += 1;
                continue;
            };
            match conn.offer(frame.clone()) {
                Enqueue::Queued => fanout.delivered += 1,
                Enqueue::Dropped => {
                    fanout.dropped += 1;
                    tracing::warn!(
                        %room_id,
                        %user_id,
                        category = %notification.category,
                        action = %notification.action,
                        "send queue full, dropping notification"
                    );
                }
                Enqueue::Closed => fanout.unreachable += 1,
            }
        }

        tracing::debug!(
            %room_id,
            category = %notification.category,
            action = %notification.action,
            delivered = fanout.delivered,
            dropped = fanout.dropped,
            unreachable = fanout.unreachable,
            "broadcast"
        );
        fanout
    }

    /// Offer a notification to one user's connection without waiting.
    pub fn send_to_user(&self, user_id: &str, notification: &Notification) -> Fanout {
        let mut fanout = Fanout::default();
        match self.registry.connections.get(user_id).map(|c| c.send(notification)) {
            Some(Enqueue::Queued) => fanout.delivered = 1,
            Some(Enqueue::Dropped) => {
                fanout.dropped = 1;
                tracing::warn!(%user_id, "send queue full, dropping notification");
            }
            Some(Enqueue::Closed) | None => fanout.unreachable = 1,
        }
        fanout
    }

    /// Persist a status change and tell every room the user is subscribed to.
    pub async fn update_status(
        &self,
        conn: &ConnectionHandle,
        status: PresenceStatus,
    ) -> Result<Fanout, GatewayError> {
        let user_id = conn.user_id();
        self.bounded(self.store.set_status(user_id, status)).await?;

        let notification = Notification::new(
            category::USER_STATUS,
            action::UPDATED,
            StatusChanged {
                user_id,
                status: status.as_str(),
            },
        );
        let mut total = Fanout::default();
        for room_id in self.registry.rooms.rooms_of(user_id) {
            total += self.broadcast_to_room(&room_id, &notification);
        }
        Ok(total)
    }

    /// Bump the room's last-activity time in the background.
    pub fn touch_room_activity(&self, room_id: &str) {
        let store = Arc::clone(&self.store);
        let deadline = self.config.store_timeout;
        let room_id = room_id.to_string();
        tokio::spawn(async move {
            if let Err(e) = with_deadline(deadline, store.touch_room_activity(&room_id)).await {
                tracing::warn!(%e, %room_id, "failed to update room activity");
            }
        });
    }

    // -----------------------------------------------------------------------
    // Notifications pushed from outside a connection (REST handlers, jobs)
    // -----------------------------------------------------------------------

    /// Broadcast `room_member/<action>` to the room.
    pub fn notify_room_member_change(&self, room_id: &str, user_id: &str, change: &str) -> Fanout {
        tracing::info!(%room_id, %user_id, %change, "room member change");
        self.broadcast_to_room(
            room_id,
            &Notification::new(
                category::ROOM_MEMBER,
                change,
                MemberChange {
                    room_id,
                    user_id,
                    timestamp: Some(wire_time(Utc::now())),
                },
            ),
        )
    }

    /// Tell the user they were removed, then drop their subscription.
    pub async fn kick_user(&self, user_id: &str, room_id: &str, reason: &str) -> Fanout {
        tracing::info!(%user_id, %room_id, %reason, "kicking user from room");
        let fanout = self.send_to_user(
            user_id,
            &Notification::new(
                category::ROOM_MEMBER,
                action::KICKED,
                Kicked {
                    room_id,
                    reason,
                    timestamp: wire_time(Utc::now()),
                },
            ),
        );

        if self.registry.rooms.unsubscribe(room_id, user_id) {
            self.decrement(room_id).await;
        }
        fanout
    }

    /// `duration = None` is a permanent mute.
    pub fn notify_user_muted(
        &self,
        user_id: &str,
        room_id: &str,
        duration: Option<Duration>,
    ) -> Fanout {
        tracing::info!(%user_id, %room_id, ?duration, "notifying mute");
        self.send_to_user(
            user_id,
            &Notification::new(
                category::MUTE,
                action::MUTED,
                MuteChanged {
                    room_id,
                    duration_secs: Some(duration.map(|d| d.as_secs())),
                    timestamp: wire_time(Utc::now()),
                },
            ),
        )
    }

    pub fn notify_user_unmuted(&self, user_id: &str, room_id: &str) -> Fanout {
        tracing::info!(%user_id, %room_id, "notifying unmute");
        self.send_to_user(
            user_id,
            &Notification::new(
                category::MUTE,
                action::UNMUTED,
                MuteChanged {
                    room_id,
                    duration_secs: None,
                    timestamp: wire_time(Utc::now()),
                },
            ),
        )
    }

    pub fn notify_message_deleted(&self, room_id: &str, message_id: &str) -> Fanout {
        self.broadcast_to_room(
            room_id,
            &Notification::new(
                category::MESSAGE,
                action::DELETED,
                MessageChanged {
                    room_id,
                    message_id,
                    text: None,
                    timestamp: wire_time(Utc::now()),
                },
            ),
        )
    }

    pub fn notify_message_edited(&self, room_id: &str, message_id: &str, text: &str) -> Fanout {
        self.broadcast_to_room(
            room_id,
            &Notification::new(
                category::MESSAGE,
                action::EDITED,
                MessageChanged {
                    room_id,
                    message_id,
                    text: Some(text),
                    timestamp: wire_time(Utc::now()),
                },
            ),
        )
    }

    /// Persist a sender-less system notification and broadcast it as `message/new`.
    pub async fn send_system_message(
        &self,
        room_id: &str,
        content: &str,
    ) -> Result<Fanout, GatewayError> {
        let stored = with_deadline(
            self.config.message_timeout,
            self.store.create_message(NewChatMessage {
                message_id: prefixed_ulid(prefix::MESSAGE),
                room_id: room_id.to_string(),
                sender_id: None,
                kind: MessageKind::SystemNotification,
                content: content.to_string(),
                quoted_message_id: None,
                media_url: None,
                sent_at: Utc::now(),
            }),
        )
        .await?;

        tracing::info!(%room_id, message_id = %stored.message_id, "system message created");
        Ok(self.broadcast_to_room(
            room_id,
            &Notification::new(category::MESSAGE, action::NEW, MessageNew::from(&stored)),
        ))
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn online_users_in_room(&self, room_id: &str) -> Vec<String> {
        let mut users: Vec<String> = self.registry.rooms.members_of(room_id).into_iter().collect();
        users.sort();
        users
    }

    pub fn online_user_count(&self) -> usize {
        self.registry.connections.len()
    }

    pub fn is_user_online(&self, user_id: &str) -> bool {
        self.registry.connections.get(user_id).is_some()
    }
}

pub(crate) async fn with_deadline<T>(
    deadline: Duration,
    call: impl Future<Output = Result<T, StoreError>>,
) -> Result<T, StoreError> {
    match tokio::time::timeout(deadline, call).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::identity::Identity;
    use crate::gateway::outbound::{self, OutboundReceiver};
    use crate::store::MemoryStore;

    fn hub_with(store: &Arc<MemoryStore>, config: GatewayConfig) -> Hub {
        Hub::new(store.clone() as Arc<dyn StoreGateway>, config)
    }

    fn conn(user_id: &str, capacity: usize) -> (ConnectionHandle, OutboundReceiver) {
        let (tx, rx) = outbound::channel(capacity);
        let identity = Identity {
            user_id: user_id.to_string(),
            username: user_id.to_string(),
        };
        (ConnectionHandle::new(&identity, tx), rx)
    }

    fn drain(rx: &mut OutboundReceiver) -> Vec<serde_json::Value> {
        let mut frames = Vec::new();
        while let Some(frame) = rx.try_recv() {
            frames.push(serde_json::from_str(frame.as_str()).unwrap());
        }
        frames
    }

    #[tokio::test]
    async fn connect_subscribes_to_persisted_memberships() {
        let store = Arc::new(MemoryStore::new());
        store.add_user("usr_a", "alice");
        store.add_member("room_1", "usr_a");
        store.add_member("room_2", "usr_a");
        let hub = hub_with(&store, GatewayConfig::default());

        let (a, _rx) = conn("usr_a", 8);
        let rooms = hub.connect(&a).await;

        assert_eq!(rooms, vec!["room_1", "room_2"]);
        assert_eq!(store.online_count("room_1"), 1);
        assert_eq!(store.online_count("room_2"), 1);
        assert_eq!(store.user_status("usr_a"), Some(PresenceStatus::Online));
        assert!(hub.is_user_online("usr_a"));
    }

    #[tokio::test]
    async fn disconnect_decrements_each_room_once() {
        for n in [0usize, 1, 3] {
            let store = Arc::new(MemoryStore::new());
            store.add_user("usr_a", "alice");
            let rooms: Vec<String> = (0..n).map(|i| format!("room_{i}")).collect();
            for room in &rooms {
                store.add_member(room, "usr_a");
            }
            let hub = hub_with(&store, GatewayConfig::default());

            let (a, _rx) = conn("usr_a", 8);
            hub.connect(&a).await;
            hub.disconnect(&a).await;
            // A repeated teardown must not decrement again.
            hub.disconnect(&a).await;

            for room in &rooms {
                assert_eq!(store.counter_calls(room), (1, 1), "room {room} with n={n}");
                assert_eq!(store.online_count(room), 0);
            }
            assert!(hub.registry().rooms.rooms_of("usr_a").is_empty());
            assert_eq!(store.user_status("usr_a"), Some(PresenceStatus::Offline));
        }
    }

    #[tokio::test]
    async fn reconnect_picks_up_membership_changes() {
        let store = Arc::new(MemoryStore::new());
        store.add_member("room_1", "usr_a");
        store.add_member("room_2", "usr_a");
        let hub = hub_with(&store, GatewayConfig::default());

        let (a1, _rx1) = conn("usr_a", 8);
        hub.connect(&a1).await;
        hub.disconnect(&a1).await;

        store.remove_member("room_1", "usr_a");
        store.add_member("room_3", "usr_a");

        let (a2, _rx2) = conn("usr_a", 8);
        let rooms = hub.connect(&a2).await;
        assert_eq!(rooms, vec!["room_2", "room_3"]);
        assert_eq!(hub.registry().rooms.rooms_of("usr_a"), vec!["room_2", "room_3"]);
        assert_eq!(store.online_count("room_1"), 0);
    }

    #[tokio::test]
    async fn second_login_evicts_without_double_counting() {
        let store = Arc::new(MemoryStore::new());
        store.add_member("room_1", "usr_a");
        store.add_member("room_2", "usr_a");
        let hub = hub_with(&store, GatewayConfig::default());

        let (first, _rx1) = conn("usr_a", 8);
        hub.connect(&first).await;
        store.remove_member("room_2", "usr_a");

        let (second, _rx2) = conn("usr_a", 8);
        hub.connect(&second).await;
        assert!(first.is_closing());

        // The replaced connection's teardown runs after the new login.
        hub.disconnect(&first).await;

        assert!(hub.registry().connections.is_current(&second));
        assert_eq!(hub.registry().rooms.rooms_of("usr_a"), vec!["room_1"]);
        assert_eq!(store.online_count("room_1"), 1);
        assert_eq!(store.online_count("room_2"), 0);
        assert_eq!(store.counter_calls("room_1"), (1, 0));
        assert_eq!(store.user_status("usr_a"), Some(PresenceStatus::Online));
    }

    #[tokio::test]
    async fn reconnect_during_teardown_stays_online() {
        let store = Arc::new(MemoryStore::new());
        store.add_user("usr_a", "alice");
        let hub = Arc::new(hub_with(&store, GatewayConfig::default()));

        let (first, _rx1) = conn("usr_a", 8);
        hub.connect(&first).await;

        // Only the offline write is slow; the new login's writes land first.
        store.set_latency(Some(Duration::from_millis(200)));
        let teardown = {
            let hub = Arc::clone(&hub);
            let first = first.clone();
            tokio::spawn(async move { hub.disconnect(&first).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        store.set_latency(None);

        let (second, _rx2) = conn("usr_a", 8);
        hub.connect(&second).await;
        assert_eq!(store.user_status("usr_a"), Some(PresenceStatus::Online));

        teardown.await.unwrap();
        assert!(hub.registry().connections.is_current(&second));
        assert_eq!(store.user_status("usr_a"), Some(PresenceStatus::Online));
    }

    #[tokio::test]
    async fn join_and_leave_pair_counter_updates() {
        let store = Arc::new(MemoryStore::new());
        store.add_room("room_1");
        let hub = hub_with(&store, GatewayConfig::default());

        let (a, _rx) = conn("usr_a", 8);
        hub.connect(&a).await;
        store.add_member("room_1", "usr_a");

        assert!(hub.join_room(&a, "room_1").await.unwrap());
        assert!(!hub.join_room(&a, "room_1").await.unwrap());
        assert_eq!(store.online_count("room_1"), 1);

        assert!(hub.leave_room(&a, "room_1").await);
        assert!(!hub.leave_room(&a, "room_1").await);
        assert_eq!(store.counter_calls("room_1"), (1, 1));
        assert_eq!(store.online_count("room_1"), 0);
    }

    #[tokio::test]
    async fn join_without_membership_is_rejected_without_mutation() {
        let store = Arc::new(MemoryStore::new());
        store.add_room("room_1");
        let hub = hub_with(&store, GatewayConfig::default());

        let (a, _rx) = conn("usr_a", 8);
        hub.connect(&a).await;

        let err = hub.join_room(&a, "room_1").await.unwrap_err();
        assert_eq!(err.reason_code(), Some(ErrorCode::NotInRoom));
        assert!(hub.registry().rooms.members_of("room_1").is_empty());
        assert_eq!(store.counter_calls("room_1"), (0, 0));
    }

    #[tokio::test]
    async fn full_queue_drops_for_one_recipient_only() {
        let store = Arc::new(MemoryStore::new());
        for user in ["usr_a", "usr_b", "usr_c", "usr_slow"] {
            store.add_member("room_1", user);
        }
        let hub = hub_with(&store, GatewayConfig::default());

        let mut receivers = Vec::new();
        for user in ["usr_a", "usr_b", "usr_c"] {
            let (c, rx) = conn(user, 8);
            hub.connect(&c).await;
            receivers.push(rx);
        }
        let (slow, _slow_rx) = conn("usr_slow", 1);
        hub.connect(&slow).await;
        assert_eq!(slow.offer("filler".into()), Enqueue::Queued);

        let fanout = hub.broadcast_to_room(
            "room_1",
            &Notification::new("message", "new", serde_json::json!({"text": "hi"})),
        );

        assert_eq!(
            fanout,
            Fanout {
                delivered: 3,
                dropped: 1,
                unreachable: 0
            }
        );
        for rx in &mut receivers {
            let frames = drain(rx);
            assert_eq!(frames.len(), 1);
            assert_eq!(frames[0]["data"]["text"], "hi");
        }
        assert_eq!(slow.dropped_frames(), 1);
    }

    #[tokio::test]
    async fn send_to_offline_user_is_unreachable() {
        let store = Arc::new(MemoryStore::new());
        let hub = hub_with(&store, GatewayConfig::default());
        let fanout = hub.send_to_user("usr_ghost", &Notification::pong());
        assert_eq!(fanout.unreachable, 1);
    }

    #[tokio::test]
    async fn kick_notifies_and_unsubscribes() {
        let store = Arc::new(MemoryStore::new());
        store.add_member("room_1", "usr_a");
        let hub = hub_with(&store, GatewayConfig::default());

        let (a, mut rx) = conn("usr_a", 8);
        hub.connect(&a).await;

        let fanout = hub.kick_user("usr_a", "room_1", "spam").await;
        assert_eq!(fanout.delivered, 1);
        let frames = drain(&mut rx);
        assert_eq!(frames[0]["type"], "room_member");
        assert_eq!(frames[0]["action"], "kicked");
        assert_eq!(frames[0]["data"]["reason"], "spam");
        assert!(hub.online_users_in_room("room_1").is_empty());
        assert_eq!(store.online_count("room_1"), 0);

        // Disconnect afterwards must not decrement the kicked room again.
        hub.disconnect(&a).await;
        assert_eq!(store.counter_calls("room_1"), (1, 1));
    }

    #[tokio::test]
    async fn mute_notifications_carry_duration() {
        let store = Arc::new(MemoryStore::new());
        let hub = hub_with(&store, GatewayConfig::default());
        let (a, mut rx) = conn("usr_a", 8);
        hub.connect(&a).await;

        hub.notify_user_muted("usr_a", "room_1", Some(Duration::from_secs(600)));
        hub.notify_user_muted("usr_a", "room_1", None);
        hub.notify_user_unmuted("usr_a", "room_1");

        let frames = drain(&mut rx);
        assert_eq!(frames[0]["action"], "muted");
        assert_eq!(frames[0]["data"]["durationSecs"], 600);
        assert!(frames[1]["data"]["durationSecs"].is_null());
        assert_eq!(frames[2]["action"], "unmuted");
        assert!(frames[2]["data"].get("durationSecs").is_none());
    }

    #[tokio::test]
    async fn system_message_is_persisted_without_sender() {
        let store = Arc::new(MemoryStore::new());
        store.add_member("room_1", "usr_a");
        let hub = hub_with(&store, GatewayConfig::default());
        let (a, mut rx) = conn("usr_a", 8);
        hub.connect(&a).await;

        let fanout = hub.send_system_message("room_1", "welcome").await.unwrap();
        assert_eq!(fanout.delivered, 1);

        let stored = store.messages();
        assert_eq!(stored.len(), 1);
        assert!(stored[0].sender_id.is_none());
        let frames = drain(&mut rx);
        assert_eq!(frames[0]["data"]["type"], "system_notification");
        assert!(frames[0]["data"].get("userId").is_none());
    }

    #[tokio::test]
    async fn edit_and_delete_reach_the_room() {
        let store = Arc::new(MemoryStore::new());
        store.add_member("room_1", "usr_a");
        let hub = hub_with(&store, GatewayConfig::default());
        let (a, mut rx) = conn("usr_a", 8);
        hub.connect(&a).await;

        hub.notify_message_edited("room_1", "msg_1", "fixed");
        hub.notify_message_deleted("room_1", "msg_1");
        hub.notify_room_member_change("room_1", "usr_b", "joined");

        let frames = drain(&mut rx);
        assert_eq!(frames[0]["action"], "edited");
        assert_eq!(frames[0]["data"]["text"], "fixed");
        assert_eq!(frames[1]["action"], "deleted");
        assert!(frames[1]["data"].get("text").is_none());
        assert_eq!(frames[2]["type"], "room_member");
        assert_eq!(frames[2]["data"]["userId"], "usr_b");
    }

    #[tokio::test]
    async fn stalled_store_is_bounded() {
        let store = Arc::new(MemoryStore::new());
        store.add_member("room_1", "usr_a");
        let config = GatewayConfig {
            store_timeout: Duration::from_millis(20),
            ..GatewayConfig::default()
        };
        let hub = hub_with(&store, config);
        let (a, _rx) = conn("usr_a", 8);
        hub.connect(&a).await;

        store.set_latency(Some(Duration::from_millis(500)));
        let err = hub.join_room(&a, "room_1").await.unwrap_err();
        assert!(matches!(err, GatewayError::StoreUnavailable(StoreError::Timeout)));
    }

    #[tokio::test]
    async fn failed_resync_still_activates_connection() {
        let store = Arc::new(MemoryStore::new());
        store.add_member("room_1", "usr_a");
        store.set_unavailable(true);
        let hub = hub_with(&store, GatewayConfig::default());

        let (a, _rx) = conn("usr_a", 8);
        let rooms = hub.connect(&a).await;
        assert!(rooms.is_empty());
        assert!(hub.is_user_online("usr_a"));
        assert_eq!(hub.online_user_count(), 1);
    }
}
