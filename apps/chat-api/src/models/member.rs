use chrono::{DateTime, Utc};
use diesel::prelude::*;

use crate::db::schema::chatroom_members;

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = chatroom_members)]
pub struct RoomMember {
    pub id: String,
    pub room_id: String,
    pub user_id: String,
    pub room_role: String,
    pub is_muted: bool,
    pub mute_until: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub joined_at: DateTime<Utc>,
}
