use chrono::{DateTime, Utc};
use diesel::prelude::*;

use crate::db::schema::messages;

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = messages)]
pub struct MessageRow {
    pub id: String,
    pub room_id: String,
    pub sender_id: Option<String>,
    pub message_type: String,
    pub content: String,
    pub quoted_message_id: Option<String>,
    pub media_url: Option<String>,
    pub sent_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = messages)]
pub struct NewMessageRow<'a> {
    pub id: &'a str,
    pub room_id: &'a str,
    pub sender_id: Option<&'a str>,
    pub message_type: &'a str,
    pub content: &'a str,
    pub quoted_message_id: Option<&'a str>,
    pub media_url: Option<&'a str>,
    pub sent_at: DateTime<Utc>,
}
