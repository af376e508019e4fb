//! Wire frames: the `{type, action, data}` envelope in both directions.

use std::fmt;

use axum::extract::ws::Utf8Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::store::StoredMessage;

use super::error::GatewayError;

// ---------------------------------------------------------------------------
// Categories and actions
// ---------------------------------------------------------------------------

pub mod category {
    pub const PING: &str = "ping";
    pub const HEARTBEAT: &str = "heartbeat";
    pub const PONG: &str = "pong";
    pub const MESSAGE: &str = "message";
    pub const ROOM: &str = "room";
    pub const ROOM_MEMBER: &str = "room_member";
    pub const USER_STATUS: &str = "user_status";
    pub const PRESENCE: &str = "presence";
    pub const TYPING: &str = "typing";
    pub const MUTE: &str = "mute";
    pub const ERROR: &str = "error";
}

pub mod action {
    pub const SEND: &str = "send";
    pub const NEW: &str = "new";
    pub const READ: &str = "read";
    pub const EDITED: &str = "edited";
    pub const DELETED: &str = "deleted";
    pub const JOIN: &str = "join";
    pub const JOINED: &str = "joined";
    pub const LEAVE: &str = "leave";
    pub const LEFT: &str = "left";
    pub const KICKED: &str = "kicked";
    pub const UPDATE: &str = "update";
    pub const UPDATED: &str = "updated";
    pub const STATUS: &str = "status";
    pub const MUTED: &str = "muted";
    pub const UNMUTED: &str = "unmuted";
}

// ---------------------------------------------------------------------------
// Reason codes
// ---------------------------------------------------------------------------

/// Machine-readable reason carried in the `action` of an error frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    NotInRoom,
    Muted,
    InvalidType,
    MissingMedia,
    InternalError,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotInRoom => "not_in_room",
            Self::Muted => "muted",
            Self::InvalidType => "invalid_type",
            Self::MissingMedia => "missing_media",
            Self::InternalError => "internal_error",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Server → Client
// ---------------------------------------------------------------------------

/// Outbound envelope used for every event pushed to clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    #[serde(rename = "type")]
    pub category: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub action: String,
    #[serde(skip_serializing_if = "Value::is_null")]
    pub data: Value,
}

impl Notification {
    /// A payload that fails to serialize is logged and sent as `data: null`.
    pub fn new(category: &str, action: &str, data: impl Serialize) -> Self {
        let data = match serde_json::to_value(data) {
            Ok(value) => value,
            Err(e) => {
                tracing::error!(?e, %category, %action, "notification payload encode failed");
                Value::Null
            }
        };
        Self {
            category: category.to_string(),
            action: action.to_string(),
            data,
        }
    }

    pub fn pong() -> Self {
        Self {
            category: category::PONG.to_string(),
            action: String::new(),
            data: Value::Null,
        }
    }

    pub fn error(code: ErrorCode, message: &str) -> Self {
        Self::new(
            category::ERROR,
            code.as_str(),
            serde_json::json!({ "message": message }),
        )
    }

    /// Serialize once; the result is shared by every recipient of a broadcast.
    pub fn encode(&self) -> Utf8Bytes {
        match serde_json::to_string(self) {
            Ok(json) => json.into(),
            Err(e) => {
                tracing::error!(?e, category = %self.category, "notification encode failed");
                Utf8Bytes::from_static("{}")
            }
        }
    }
}

/// RFC 3339 in UTC with whole seconds, the format every timestamp field uses.
pub fn wire_time(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Payload of `message/new`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageNew {
    pub message_id: String,
    pub room_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
    pub text: String,
    pub time: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quoted_message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
}

impl From<&StoredMessage> for MessageNew {
    fn from(m: &StoredMessage) -> Self {
        Self {
            message_id: m.message_id.clone(),
            room_id: m.room_id.clone(),
            user_id: m.sender_id.clone(),
            kind: m.kind.as_str().to_string(),
            text: m.content.clone(),
            time: wire_time(m.sent_at),
            user_name: m.sender_name.clone(),
            avatar_url: m.sender_avatar.clone(),
            quoted_message_id: m.quoted_message_id.clone().filter(|s| !s.is_empty()),
            media_url: m.media_url.clone().filter(|s| !s.is_empty()),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomAck<'a> {
    pub room_id: &'a str,
    pub success: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberChange<'a> {
    pub room_id: &'a str,
    pub user_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusChanged<'a> {
    pub user_id: &'a str,
    pub status: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingStatus<'a> {
    pub room_id: &'a str,
    pub user_id: &'a str,
    pub typing: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Kicked<'a> {
    pub room_id: &'a str,
    pub reason: &'a str,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MuteChanged<'a> {
    pub room_id: &'a str,
    /// Absent on unmute; `null` on a permanent mute.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<Option<u64>>,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageChanged<'a> {
    pub room_id: &'a str,
    pub message_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<&'a str>,
    pub timestamp: String,
}

// ---------------------------------------------------------------------------
// Client → Server
// ---------------------------------------------------------------------------

/// A frame received from the client, before dispatch.
#[derive(Debug, Deserialize)]
pub struct ClientFrame {
    #[serde(rename = "type")]
    pub category: String,
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessagePayload {
    pub room_id: String,
    #[serde(default)]
    pub message_type: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub quoted_message_id: Option<String>,
    #[serde(default)]
    pub media_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomPayload {
    pub room_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PresencePayload {
    pub status: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadReceiptPayload {
    pub room_id: String,
    pub message_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingPayload {
    pub room_id: String,
    #[serde(default)]
    pub typing: bool,
}

/// A decoded inbound command.
#[derive(Debug, Clone)]
pub enum Command {
    Ping,
    SendMessage(SendMessagePayload),
    JoinRoom(RoomPayload),
    LeaveRoom(RoomPayload),
    UpdatePresence(PresencePayload),
    ReadReceipt(ReadReceiptPayload),
    Typing(TypingPayload),
    Unknown { category: String, action: String },
}

impl Command {
    /// Decode raw text into a command.
    ///
    /// Unrecognized category/action pairs decode to [`Command::Unknown`];
    /// only a broken envelope or a bad payload for a known command is an error.
    pub fn decode(text: &str) -> Result<Self, GatewayError> {
        let frame: ClientFrame = serde_json::from_str(text)?;
        Self::from_frame(frame)
    }

    pub fn from_frame(frame: ClientFrame) -> Result<Self, GatewayError> {
        use self::action as a;
        use self::category as c;

        let command = match (frame.category.as_str(), frame.action.as_str()) {
            (c::PING | c::HEARTBEAT, _) => Self::Ping,
            (c::MESSAGE, a::SEND) => Self::SendMessage(serde_json::from_value(frame.data)?),
            (c::MESSAGE, a::READ) => Self::ReadReceipt(serde_json::from_value(frame.data)?),
            (c::ROOM, a::JOIN) => Self::JoinRoom(serde_json::from_value(frame.data)?),
            (c::ROOM, a::LEAVE) => Self::LeaveRoom(serde_json::from_value(frame.data)?),
            (c::USER_STATUS | c::PRESENCE, a::UPDATE) => {
                Self::UpdatePresence(serde_json::from_value(frame.data)?)
            }
            (c::TYPING, _) => Self::Typing(serde_json::from_value(frame.data)?),
            _ => Self::Unknown {
                category: frame.category,
                action: frame.action,
            },
        };
        Ok(command)
    }

    /// `category/action` label for logs.
    pub fn label(&self) -> String {
        match self {
            Self::Ping => "ping".to_string(),
            Self::SendMessage(_) => "message/send".to_string(),
            Self::JoinRoom(_) => "room/join".to_string(),
            Self::LeaveRoom(_) => "room/leave".to_string(),
            Self::UpdatePresence(_) => "user_status/update".to_string(),
            Self::ReadReceipt(_) => "message/read".to_string(),
            Self::Typing(_) => "typing".to_string(),
            Self::Unknown { category, action } => format!("{category}/{action}"),
        }
    }
}
