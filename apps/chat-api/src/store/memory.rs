use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard};

use super::{
    mute_in_effect, NewChatMessage, PresenceStatus, StoreError, StoreGateway, StoredMessage,
};

// ---------------------------------------------------------------------------
// In-memory implementation (for local runs / tests)
// ---------------------------------------------------------------------------

struct UserRecord {
    username: String,
    nickname: Option<String>,
    avatar_url: Option<String>,
    status: PresenceStatus,
    global_muted: bool,
    global_mute_until: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct RoomRecord {
    online_count: i64,
    last_active_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct MemberRecord {
    is_muted: bool,
    mute_until: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct Inner {
    users: HashMap<String, UserRecord>,
    rooms: HashMap<String, RoomRecord>,
    /// Keyed by (room_id, user_id).
    members: HashMap<(String, String), MemberRecord>,
    messages: Vec<StoredMessage>,
    /// (increments, decrements) per room id, including unknown rooms.
    counter_calls: HashMap<String, (usize, usize)>,
    unavailable: bool,
    latency: Option<Duration>,
}

/// Store gateway kept entirely in process memory.
///
/// Besides the trait operations it exposes seeding and inspection helpers so
/// tests can arrange membership and mute state and then assert on counters.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    // -- seeding ------------------------------------------------------------

    pub fn add_user(&self, user_id: &str, username: &str) {
        self.inner.lock().users.insert(
            user_id.to_string(),
            UserRecord {
                username: username.to_string(),
                nickname: None,
                avatar_url: None,
                status: PresenceStatus::Offline,
                global_muted: false,
                global_mute_until: None,
            },
        );
    }

    pub fn set_profile(&self, user_id: &str, nickname: Option<&str>, avatar_url: Option<&str>) {
        if let Some(user) = self.inner.lock().users.get_mut(user_id) {
            user.nickname = nickname.map(str::to_string);
            user.avatar_url = avatar_url.map(str::to_string);
        }
    }

    pub fn add_room(&self, room_id: &str) {
        self.inner
            .lock()
            .rooms
            .entry(room_id.to_string())
            .or_default();
    }

    /// Adds an active membership, creating the room if needed.
    pub fn add_member(&self, room_id: &str, user_id: &str) {
        let mut inner = self.inner.lock();
        inner.rooms.entry(room_id.to_string()).or_default();
        inner
            .members
            .insert((room_id.to_string(), user_id.to_string()), MemberRecord::default());
    }

    pub fn remove_member(&self, room_id: &str, user_id: &str) {
        self.inner
            .lock()
            .members
            .remove(&(room_id.to_string(), user_id.to_string()));
    }

    /// Mutes a member in one room. `until = None` is permanent.
    pub fn mute_member(&self, room_id: &str, user_id: &str, until: Option<DateTime<Utc>>) {
        let mut inner = self.inner.lock();
        if let Some(member) = inner
            .members
            .get_mut(&(room_id.to_string(), user_id.to_string()))
        {
            member.is_muted = true;
            member.mute_until = until;
        }
    }

    pub fn mute_globally(&self, user_id: &str, until: Option<DateTime<Utc>>) {
        if let Some(user) = self.inner.lock().users.get_mut(user_id) {
            user.global_muted = true;
            user.global_mute_until = until;
        }
    }

    /// Makes every subsequent call fail with `StoreError::Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.inner.lock().unavailable = unavailable;
    }

    /// Delays every subsequent call, to exercise caller deadlines.
    pub fn set_latency(&self, latency: Option<Duration>) {
        self.inner.lock().latency = latency;
    }

    // -- inspection ---------------------------------------------------------

    pub fn online_count(&self, room_id: &str) -> i64 {
        self.inner
            .lock()
            .rooms
            .get(room_id)
            .map_or(0, |r| r.online_count)
    }

    /// Number of (increment, decrement) calls made for a room.
    pub fn counter_calls(&self, room_id: &str) -> (usize, usize) {
        self.inner
            .lock()
            .counter_calls
            .get(room_id)
            .copied()
            .unwrap_or_default()
    }

    pub fn user_status(&self, user_id: &str) -> Option<PresenceStatus> {
        self.inner.lock().users.get(user_id).map(|u| u.status)
    }

    pub fn messages(&self) -> Vec<StoredMessage> {
        self.inner.lock().messages.clone()
    }

    pub fn last_active_at(&self, room_id: &str) -> Option<DateTime<Utc>> {
        self.inner
            .lock()
            .rooms
            .get(room_id)
            .and_then(|r| r.last_active_at)
    }

    // -- internals ----------------------------------------------------------

    async fn enter(&self) -> Result<MutexGuard<'_, Inner>, StoreError> {
        let latency = self.inner.lock().latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        let inner = self.inner.lock();
        if inner.unavailable {
            return Err(StoreError::Unavailable("memory store offline".to_string()));
        }
        Ok(inner)
    }
}

#[async_trait]
impl StoreGateway for MemoryStore {
    async fn is_member(&self, user_id: &str, room_id: &str) -> Result<bool, StoreError> {
        let inner = self.enter().await?;
        Ok(inner
            .members
            .contains_key(&(room_id.to_string(), user_id.to_string())))
    }

    async fn can_send(&self, user_id: &str, room_id: &str) -> Result<bool, StoreError> {
        let inner = self.enter().await?;
        let now = Utc::now();

        if let Some(user) = inner.users.get(user_id) {
            if mute_in_effect(user.global_muted, user.global_mute_until, now) {
                return Ok(false);
            }
        }

        Ok(inner
            .members
            .get(&(room_id.to_string(), user_id.to_string()))
            .is_some_and(|m| !mute_in_effect(m.is_muted, m.mute_until, now)))
    }

    async fn create_message(&self, message: NewChatMessage) -> Result<StoredMessage, StoreError> {
        let mut inner = self.enter().await?;

        let sender = message
            .sender_id
            .as_deref()
            .and_then(|id| inner.users.get(id));
        let sender_name = sender.map(|u| match u.nickname.as_deref() {
            Some(nick) if !nick.is_empty() => nick.to_string(),
            _ => u.username.clone(),
        });
        let sender_avatar = sender.and_then(|u| u.avatar_url.clone());

        let stored = StoredMessage {
            message_id: message.message_id,
            room_id: message.room_id,
            sender_id: message.sender_id,
            kind: message.kind,
            content: message.content,
            quoted_message_id: message.quoted_message_id,
            media_url: message.media_url,
            sent_at: message.sent_at,
            sender_name,
            sender_avatar,
        };
        inner.messages.push(stored.clone());
        Ok(stored)
    }

    async fn list_memberships(&self, user_id: &str) -> Result<Vec<String>, StoreError> {
        let inner = self.enter().await?;
        let mut rooms: Vec<String> = inner
            .members
            .keys()
            .filter(|(_, member)| member == user_id)
            .map(|(room, _)| room.clone())
            .collect();
        rooms.sort();
        Ok(rooms)
    }

    async fn set_status(&self, user_id: &str, status: PresenceStatus) -> Result<(), StoreError> {
        let mut inner = self.enter().await?;
        if let Some(user) = inner.users.get_mut(user_id) {
            user.status = status;
        }
        Ok(())
    }

    async fn increment_online_count(&self, room_id: &str) -> Result<(), StoreError> {
        let mut inner = self.enter().await?;
        inner.counter_calls.entry(room_id.to_string()).or_default().0 += 1;
        if let Some(room) = inner.rooms.get_mut(room_id) {
            room.online_count += 1;
        }
        Ok(())
    }

    async fn decrement_online_count(&self, room_id: &str) -> Result<(), StoreError> {
        let mut inner = self.enter().await?;
        inner.counter_calls.entry(room_id.to_string()).or_default().1 += 1;
        if let Some(room) = inner.rooms.get_mut(room_id) {
            if room.online_count > 0 {
                room.online_count -= 1;
            }
        }
        Ok(())
    }

    async fn touch_room_activity(&self, room_id: &str) -> Result<(), StoreError> {
        let mut inner = self.enter().await?;
        if let Some(room) = inner.rooms.get_mut(room_id) {
            room.last_active_at = Some(Utc::now());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MessageKind;

    fn text_message(room_id: &str, sender_id: &str, content: &str) -> NewChatMessage {
        NewChatMessage {
            message_id: "msg_1".to_string(),
            room_id: room_id.to_string(),
            sender_id: Some(sender_id.to_string()),
            kind: MessageKind::Text,
            content: content.to_string(),
            quoted_message_id: None,
            media_url: None,
            sent_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn membership_and_listing() {
        let store = MemoryStore::new();
        store.add_member("room_b", "usr_a");
        store.add_member("room_a", "usr_a");
        store.add_member("room_a", "usr_b");

        assert!(store.is_member("usr_a", "room_a").await.unwrap());
        assert!(!store.is_member("usr_b", "room_b").await.unwrap());
        assert_eq!(
            store.list_memberships("usr_a").await.unwrap(),
            vec!["room_a".to_string(), "room_b".to_string()]
        );
    }

    #[tokio::test]
    async fn decrement_never_goes_negative() {
        let store = MemoryStore::new();
        store.add_room("room_a");

        store.decrement_online_count("room_a").await.unwrap();
        assert_eq!(store.online_count("room_a"), 0);

        store.increment_online_count("room_a").await.unwrap();
        store.decrement_online_count("room_a").await.unwrap();
        store.decrement_online_count("room_a").await.unwrap();
        assert_eq!(store.online_count("room_a"), 0);
        assert_eq!(store.counter_calls("room_a"), (1, 3));
    }

    #[tokio::test]
    async fn counters_on_unknown_room_are_noops() {
        let store = MemoryStore::new();
        store.increment_online_count("room_ghost").await.unwrap();
        assert_eq!(store.online_count("room_ghost"), 0);
    }

    #[tokio::test]
    async fn room_mute_respects_expiry() {
        let store = MemoryStore::new();
        store.add_member("room_a", "usr_a");
        assert!(store.can_send("usr_a", "room_a").await.unwrap());

        store.mute_member("room_a", "usr_a", None);
        assert!(!store.can_send("usr_a", "room_a").await.unwrap());

        let past = Utc::now() - chrono::Duration::minutes(1);
        store.mute_member("room_a", "usr_a", Some(past));
        assert!(store.can_send("usr_a", "room_a").await.unwrap());
    }

    #[tokio::test]
    async fn global_mute_blocks_every_room() {
        let store = MemoryStore::new();
        store.add_user("usr_a", "alice");
        store.add_member("room_a", "usr_a");
        store.mute_globally("usr_a", Some(Utc::now() + chrono::Duration::hours(1)));

        assert!(!store.can_send("usr_a", "room_a").await.unwrap());
    }

    #[tokio::test]
    async fn create_message_prefers_nickname() {
        let store = MemoryStore::new();
        store.add_user("usr_a", "alice");
        store.set_profile("usr_a", Some("Ali"), Some("https://cdn/a.png"));

        let stored = store
            .create_message(text_message("room_a", "usr_a", "hi"))
            .await
            .unwrap();
        assert_eq!(stored.sender_name.as_deref(), Some("Ali"));
        assert_eq!(stored.sender_avatar.as_deref(), Some("https://cdn/a.png"));
        assert_eq!(store.messages().len(), 1);
    }

    #[tokio::test]
    async fn unavailable_store_fails_every_call() {
        let store = MemoryStore::new();
        store.set_unavailable(true);

        let err = store.list_memberships("usr_a").await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
        assert!(store
            .create_message(text_message("room_a", "usr_a", "hi"))
            .await
            .is_err());
    }
}
