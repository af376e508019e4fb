//! Store gateway: the durable side of presence, membership and messages.

pub mod memory;
pub mod pg;

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

pub use memory::MemoryStore;
pub use pg::PgStore;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store call timed out")]
    Timeout,

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] diesel_async::pooled_connection::deadpool::PoolError),
}

// ---------------------------------------------------------------------------
// Domain types
// ---------------------------------------------------------------------------

/// Kind of a chat message, stored as its wire string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Text,
    Image,
    File,
    SystemNotification,
}

impl MessageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::File => "file",
            Self::SystemNotification => "system_notification",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "text" => Some(Self::Text),
            "image" => Some(Self::Image),
            "file" => Some(Self::File),
            "system_notification" => Some(Self::SystemNotification),
            _ => None,
        }
    }

    /// Image and file messages must carry a media URL.
    pub fn requires_media(self) -> bool {
        matches!(self, Self::Image | Self::File)
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A user's persisted online status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceStatus {
    Online,
    Away,
    Busy,
    Offline,
}

impl PresenceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Away => "away",
            Self::Busy => "busy",
            Self::Offline => "offline",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "online" => Some(Self::Online),
            "away" => Some(Self::Away),
            "busy" => Some(Self::Busy),
            "offline" => Some(Self::Offline),
            _ => None,
        }
    }
}

impl fmt::Display for PresenceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A message about to be persisted. `sender_id` is `None` for system messages.
#[derive(Debug, Clone)]
pub struct NewChatMessage {
    pub message_id: String,
    pub room_id: String,
    pub sender_id: Option<String>,
    pub kind: MessageKind,
    pub content: String,
    pub quoted_message_id: Option<String>,
    pub media_url: Option<String>,
    pub sent_at: DateTime<Utc>,
}

/// A persisted message joined with its sender's display fields.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredMessage {
    pub message_id: String,
    pub room_id: String,
    pub sender_id: Option<String>,
    pub kind: MessageKind,
    pub content: String,
    pub quoted_message_id: Option<String>,
    pub media_url: Option<String>,
    pub sent_at: DateTime<Utc>,
    pub sender_name: Option<String>,
    pub sender_avatar: Option<String>,
}

/// Whether a mute flag is still binding at `now`. No expiry means permanent.
pub fn mute_in_effect(muted: bool, until: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    muted && until.map_or(true, |t| t > now)
}

// ---------------------------------------------------------------------------
// Gateway trait
// ---------------------------------------------------------------------------

/// Persistent operations the hub consumes.
///
/// Implementations must be cheap to share: the hub holds one behind an `Arc`
/// and calls it from every connection task concurrently.
#[async_trait]
pub trait StoreGateway: Send + Sync {
    /// True if the user holds an active membership row for the room.
    async fn is_member(&self, user_id: &str, room_id: &str) -> Result<bool, StoreError>;

    /// False if the user is muted in the room or globally, accounting for expiry.
    async fn can_send(&self, user_id: &str, room_id: &str) -> Result<bool, StoreError>;

    async fn create_message(&self, message: NewChatMessage) -> Result<StoredMessage, StoreError>;

    /// Room ids of every active membership the user holds.
    async fn list_memberships(&self, user_id: &str) -> Result<Vec<String>, StoreError>;

    async fn set_status(&self, user_id: &str, status: PresenceStatus) -> Result<(), StoreError>;

    async fn set_online(&self, user_id: &str) -> Result<(), StoreError> {
        self.set_status(user_id, PresenceStatus::Online).await
    }

    async fn set_offline(&self, user_id: &str) -> Result<(), StoreError> {
        self.set_status(user_id, PresenceStatus::Offline).await
    }

    async fn increment_online_count(&self, room_id: &str) -> Result<(), StoreError>;

    /// Never takes the counter below zero.
    async fn decrement_online_count(&self, room_id: &str) -> Result<(), StoreError>;

    async fn touch_room_activity(&self, room_id: &str) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn permanent_mute_never_expires() {
        let now = Utc::now();
        assert!(mute_in_effect(true, None, now));
    }

    #[test]
    fn expired_mute_is_lifted() {
        let now = Utc::now();
        assert!(!mute_in_effect(true, Some(now - Duration::seconds(1)), now));
        assert!(mute_in_effect(true, Some(now + Duration::minutes(5)), now));
        assert!(!mute_in_effect(false, Some(now + Duration::minutes(5)), now));
    }

    #[test]
    fn message_kind_media_rules() {
        assert_eq!(MessageKind::parse("image"), Some(MessageKind::Image));
        assert_eq!(MessageKind::parse("video"), None);
        assert!(MessageKind::File.requires_media());
        assert!(!MessageKind::Text.requires_media());
        assert!(!MessageKind::SystemNotification.requires_media());
    }
}
