//! Inbound command handling.
//!
//! Every failure stays inside the command that caused it: a rejected command
//! sends one error frame to its own connection, a malformed frame is logged
//! and dropped, and the read loop carries on either way.

use std::sync::Arc;

use chrono::Utc;

use chat_common::id::{prefix, prefixed_ulid};

use crate::store::{MessageKind, NewChatMessage, PresenceStatus, StoreError};

use super::connection::ConnectionHandle;
use super::error::GatewayError;
use super::events::{
    action, category, Command, ErrorCode, MemberChange, MessageNew, Notification,
    ReadReceiptPayload, RoomAck, RoomPayload, SendMessagePayload, TypingPayload, TypingStatus,
};
use super::hub::Hub;

/// Decode and handle one text frame from `conn`.
pub async fn handle_frame(hub: &Arc<Hub>, conn: &ConnectionHandle, text: &str) {
    let command = match Command::decode(text) {
        Ok(command) => command,
        Err(e) => {
            tracing::warn!(user_id = %conn.user_id(), %e, "dropping malformed frame");
            return;
        }
    };

    let label = command.label();
    tracing::debug!(user_id = %conn.user_id(), command = %label, "received command");

    if let Err(e) = handle_command(hub, conn, command).await {
        match e.reason_code() {
            Some(code) => {
                if code == ErrorCode::InternalError {
                    tracing::error!(user_id = %conn.user_id(), command = %label, %e, "command failed");
                } else {
                    tracing::info!(user_id = %conn.user_id(), command = %label, %code, "command rejected");
                }
                conn.send(&Notification::error(code, &client_message(&e)));
            }
            None => {
                tracing::warn!(user_id = %conn.user_id(), command = %label, %e, "command dropped");
            }
        }
    }
}

pub async fn handle_command(
    hub: &Arc<Hub>,
    conn: &ConnectionHandle,
    command: Command,
) -> Result<(), GatewayError> {
    match command {
        Command::Ping => {
            conn.send(&Notification::pong());
            Ok(())
        }
        Command::SendMessage(payload) => send_message(hub, conn, payload).await,
        Command::JoinRoom(payload) => join_room(hub, conn, payload).await,
        Command::LeaveRoom(payload) => {
            leave_room(hub, conn, payload).await;
            Ok(())
        }
        Command::UpdatePresence(payload) => {
            let status = PresenceStatus::parse(&payload.status).ok_or_else(|| {
                GatewayError::Malformed(format!("unknown status {:?}", payload.status))
            })?;
            let fanout = hub.update_status(conn, status).await?;
            tracing::info!(
                user_id = %conn.user_id(),
                %status,
                notified = fanout.delivered,
                "status updated"
            );
            Ok(())
        }
        Command::ReadReceipt(payload) => {
            read_receipt(conn, &payload);
            Ok(())
        }
        Command::Typing(payload) => {
            typing(hub, conn, &payload);
            Ok(())
        }
        Command::Unknown { category, action } => {
            tracing::warn!(user_id = %conn.user_id(), %category, %action, "unknown command ignored");
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// message/send
// ---------------------------------------------------------------------------

async fn send_message(
    hub: &Arc<Hub>,
    conn: &ConnectionHandle,
    payload: SendMessagePayload,
) -> Result<(), GatewayError> {
    let deadline = hub.config().message_timeout;
    match tokio::time::timeout(deadline, persist_and_broadcast(hub, conn, payload)).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout.into()),
    }
}

async fn persist_and_broadcast(
    hub: &Arc<Hub>,
    conn: &ConnectionHandle,
    payload: SendMessagePayload,
) -> Result<(), GatewayError> {
    let store = hub.store();
    let user_id = conn.user_id();
    let room_id = payload.room_id;

    if !store.is_member(user_id, &room_id).await? {
        return Err(GatewayError::rejected(
            ErrorCode::NotInRoom,
            "You are not a member of this room",
        ));
    }

    if !store.can_send(user_id, &room_id).await? {
        return Err(GatewayError::rejected(
            ErrorCode::Muted,
            "You are muted and cannot send messages",
        ));
    }

    let kind = MessageKind::parse(&payload.message_type)
        .ok_or_else(|| GatewayError::rejected(ErrorCode::InvalidType, "Invalid message type"))?;

    let media_url = payload.media_url.filter(|url| !url.is_empty());
    if kind.requires_media() && media_url.is_none() {
        return Err(GatewayError::rejected(
            ErrorCode::MissingMedia,
            "Media URL required for this message type",
        ));
    }

    let stored = store
        .create_message(NewChatMessage {
            message_id: prefixed_ulid(prefix::MESSAGE),
            room_id: room_id.clone(),
            sender_id: Some(user_id.to_string()),
            kind,
            content: payload.text,
            quoted_message_id: payload.quoted_message_id.filter(|id| !id.is_empty()),
            media_url,
            sent_at: Utc::now(),
        })
        .await?;

    tracing::info!(
        %user_id,
        %room_id,
        message_id = %stored.message_id,
        kind = %stored.kind,
        "message created"
    );

    hub.touch_room_activity(&room_id);

    let fanout = hub.broadcast_to_room(
        &room_id,
        &Notification::new(category::MESSAGE, action::NEW, MessageNew::from(&stored)),
    );
    tracing::debug!(
        message_id = %stored.message_id,
        delivered = fanout.delivered,
        dropped = fanout.dropped,
        "message fanned out"
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// room/join, room/leave
// ---------------------------------------------------------------------------

async fn join_room(
    hub: &Arc<Hub>,
    conn: &ConnectionHandle,
    payload: RoomPayload,
) -> Result<(), GatewayError> {
    let room_id = payload.room_id.as_str();
    let newly_subscribed = hub.join_room(conn, room_id).await?;

    conn.send(&Notification::new(
        category::ROOM,
        action::JOINED,
        RoomAck {
            room_id,
            success: true,
        },
    ));

    if newly_subscribed {
        hub.broadcast_to_room(
            room_id,
            &Notification::new(
                category::ROOM_MEMBER,
                action::JOINED,
                MemberChange {
                    room_id,
                    user_id: conn.user_id(),
                    timestamp: None,
                },
            ),
        );
    }

    tracing::info!(user_id = %conn.user_id(), %room_id, newly_subscribed, "joined room");
    Ok(())
}

async fn leave_room(hub: &Arc<Hub>, conn: &ConnectionHandle, payload: RoomPayload) {
    let room_id = payload.room_id.as_str();
    let was_subscribed = hub.leave_room(conn, room_id).await;

    conn.send(&Notification::new(
        category::ROOM,
        action::LEFT,
        RoomAck {
            room_id,
            success: true,
        },
    ));

    if was_subscribed {
        hub.broadcast_to_room(
            room_id,
            &Notification::new(
                category::ROOM_MEMBER,
                action::LEFT,
                MemberChange {
                    room_id,
                    user_id: conn.user_id(),
                    timestamp: None,
                },
            ),
        );
    }

    tracing::info!(user_id = %conn.user_id(), %room_id, was_subscribed, "left room");
}

// ---------------------------------------------------------------------------
// message/read, typing
// ---------------------------------------------------------------------------

// TODO: persist read positions once the store exposes a last-read column.
fn read_receipt(conn: &ConnectionHandle, payload: &ReadReceiptPayload) {
    tracing::info!(
        user_id = %conn.user_id(),
        room_id = %payload.room_id,
        message_id = %payload.message_id,
        "message read"
    );
}

fn typing(hub: &Hub, conn: &ConnectionHandle, payload: &TypingPayload) {
    let room_id = payload.room_id.as_str();
    // Only rooms the user is live in; no store round trip for typing.
    if !hub.registry().rooms.is_subscribed(room_id, conn.user_id()) {
        tracing::debug!(user_id = %conn.user_id(), %room_id, "typing for unsubscribed room ignored");
        return;
    }

    hub.broadcast_to_room(
        room_id,
        &Notification::new(
            category::TYPING,
            action::STATUS,
            TypingStatus {
                room_id,
                user_id: conn.user_id(),
                typing: payload.typing,
            },
        ),
    );
}

/// Text for the error frame's `message` field.
fn client_message(e: &GatewayError) -> String {
    match e {
        GatewayError::Rejected { message, .. } => message.clone(),
        GatewayError::StoreUnavailable(StoreError::Timeout) => "Request timed out".to_string(),
        _ => "Internal server error".to_string(),
    }
}
