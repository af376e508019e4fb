use chrono::{DateTime, Utc};
use diesel::prelude::*;

use crate::db::schema::users;

/// The columns of a user the hub needs: display identity and global mute state.
#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = users)]
pub struct ChatUser {
    pub id: String,
    pub username: String,
    pub nickname: Option<String>,
    pub avatar_url: Option<String>,
    pub global_muted: bool,
    pub global_mute_until: Option<DateTime<Utc>>,
}

impl ChatUser {
    /// Nickname when set, otherwise the username.
    pub fn display_name(&self) -> &str {
        match self.nickname.as_deref() {
            Some(nick) if !nick.is_empty() => nick,
            _ => &self.username,
        }
    }
}
