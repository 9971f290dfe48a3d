use serde_json::Value;

use chat_fabric_protocol::ChatRoomType;

/// A durable `token → (app_user_id, device_id)` mapping (`GLOSSARY`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRow {
    pub app_user_id: String,
    pub device_id: String,
}

/// A chat room row (`§4.6` membership validation).
#[derive(Debug, Clone)]
pub struct ChatRoom {
    pub identifier: String,
    pub room_type: ChatRoomType,
    pub app_users: Vec<String>,
}

impl ChatRoom {
    /// `§4.6`: for non-`MASS_PUBLIC` rooms the sender must appear in
    /// `app_users`.
    pub fn is_member(&self, app_user_id: &str) -> bool {
        !self.room_type.requires_membership() || self.app_users.iter().any(|u| u == app_user_id)
    }
}

/// A persisted chat message row.
#[derive(Debug, Clone)]
pub struct ChatMessageRow {
    pub message_timestamp_identifier: i64,
    pub chat_room_identifier: String,
    pub app_user_identifier: String,
    pub message: Value,
}
