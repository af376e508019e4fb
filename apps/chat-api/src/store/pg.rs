//! Postgres-backed store gateway.

use async_trait::async_trait;
use chrono::Utc;
use diesel::prelude::*;
use diesel::result::OptionalExtension;

use crate::db::pool::DbPool;
use crate::db::schema::{chatroom_members, chatrooms, messages, users};
use crate::models::member::RoomMember;
use crate::models::message::{MessageRow, NewMessageRow};
use crate::models::user::ChatUser;

use super::{
    mute_in_effect, MessageKind, NewChatMessage, PresenceStatus, StoreError, StoreGateway,
    StoredMessage,
};

pub struct PgStore {
    db: DbPool,
}

impl PgStore {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl StoreGateway for PgStore {
    async fn is_member(&self, user_id: &str, room_id: &str) -> Result<bool, StoreError> {
        let mut conn = self.db.get().await?;

        let found: bool = diesel_async::RunQueryDsl::get_result(
            diesel::select(diesel::dsl::exists(
                chatroom_members::table
                    .filter(chatroom_members::user_id.eq(user_id))
                    .filter(chatroom_members::room_id.eq(room_id))
                    .filter(chatroom_members::is_active.eq(true)),
            )),
            &mut conn,
        )
        .await?;

        Ok(found)
    }

    async fn can_send(&self, user_id: &str, room_id: &str) -> Result<bool, StoreError> {
        let mut conn = self.db.get().await?;
        let now = Utc::now();

        let user: Option<ChatUser> = diesel_async::RunQueryDsl::get_result(
            users::table.find(user_id).select(ChatUser::as_select()),
            &mut conn,
        )
        .await
        .optional()?;

        let Some(user) = user else {
            return Ok(false);
        };
        if mute_in_effect(user.global_muted, user.global_mute_until, now) {
            return Ok(false);
        }

        let member: Option<RoomMember> = diesel_async::RunQueryDsl::get_result(
            chatroom_members::table
                .filter(chatroom_members::user_id.eq(user_id))
                .filter(chatroom_members::room_id.eq(room_id))
                .filter(chatroom_members::is_active.eq(true))
                .select(RoomMember::as_select()),
            &mut conn,
        )
        .await
        .optional()?;

        Ok(member.is_some_and(|m| !mute_in_effect(m.is_muted, m.mute_until, now)))
    }

    async fn create_message(&self, message: NewChatMessage) -> Result<StoredMessage, StoreError> {
        let mut conn = self.db.get().await?;

        let row: MessageRow = diesel_async::RunQueryDsl::get_result(
            diesel::insert_into(messages::table)
                .values(NewMessageRow {
                    id: &message.message_id,
                    room_id: &message.room_id,
                    sender_id: message.sender_id.as_deref(),
                    message_type: message.kind.as_str(),
                    content: &message.content,
                    quoted_message_id: message.quoted_message_id.as_deref(),
                    media_url: message.media_url.as_deref(),
                    sent_at: message.sent_at,
                })
                .returning(MessageRow::as_returning()),
            &mut conn,
        )
        .await?;

        let sender: Option<ChatUser> = match row.sender_id.as_deref() {
            Some(sender_id) => diesel_async::RunQueryDsl::get_result(
                users::table.find(sender_id).select(ChatUser::as_select()),
                &mut conn,
            )
            .await
            .optional()?,
            None => None,
        };

        Ok(StoredMessage {
            kind: MessageKind::parse(&row.message_type).unwrap_or(message.kind),
            message_id: row.id,
            room_id: row.room_id,
            sender_id: row.sender_id,
            content: row.content,
            quoted_message_id: row.quoted_message_id,
            media_url: row.media_url,
            sent_at: row.sent_at,
            sender_name: sender.as_ref().map(|u| u.display_name().to_string()),
            sender_avatar: sender.and_then(|u| u.avatar_url),
        })
    }

    async fn list_memberships(&self, user_id: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.db.get().await?;

        let rooms: Vec<String> = diesel_async::RunQueryDsl::load(
            chatroom_members::table
                .filter(chatroom_members::user_id.eq(user_id))
                .filter(chatroom_members::is_active.eq(true))
                .select(chatroom_members::room_id),
            &mut conn,
        )
        .await?;

        Ok(rooms)
    }

    async fn set_status(&self, user_id: &str, status: PresenceStatus) -> Result<(), StoreError> {
        let mut conn = self.db.get().await?;

        diesel_async::RunQueryDsl::execute(
            diesel::update(users::table.find(user_id)).set((
                users::online_status.eq(status.as_str()),
                users::last_seen_at.eq(Utc::now()),
            )),
            &mut conn,
        )
        .await?;

        Ok(())
    }

    async fn increment_online_count(&self, room_id: &str) -> Result<(), StoreError> {
        let mut conn = self.db.get().await?;

        diesel_async::RunQueryDsl::execute(
            diesel::update(chatrooms::table.find(room_id))
                .set(chatrooms::online_count.eq(chatrooms::online_count + 1)),
            &mut conn,
        )
        .await?;

        Ok(())
    }

    async fn decrement_online_count(&self, room_id: &str) -> Result<(), StoreError> {
        let mut conn = self.db.get().await?;

        // Zero-count and unknown rooms match no rows.
        diesel_async::RunQueryDsl::execute(
            diesel::update(
                chatrooms::table
                    .filter(chatrooms::id.eq(room_id))
                    .filter(chatrooms::online_count.gt(0)),
            )
            .set(chatrooms::online_count.eq(chatrooms::online_count - 1)),
            &mut conn,
        )
        .await?;

        Ok(())
    }

    async fn touch_room_activity(&self, room_id: &str) -> Result<(), StoreError> {
        let mut conn = self.db.get().await?;

        diesel_async::RunQueryDsl::execute(
            diesel::update(chatrooms::table.find(room_id))
                .set(chatrooms::last_active_at.eq(Utc::now())),
            &mut conn,
        )
        .await?;

        Ok(())
    }
}
