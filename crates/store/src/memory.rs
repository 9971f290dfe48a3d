//! In-memory reference implementation of the five table-store traits, used
//! by tests and by operators without a durable backend wired up yet
//! (`§2.1`'s ambient-stack `store` crate description).

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use serde_json::Value;

use crate::{
    error::Result,
    traits::{ChatMessageStore, ChatRoomStore, CustomDataStore, LastMessageReadStore, SessionStore},
    types::{ChatMessageRow, ChatRoom, SessionRow},
};

/// An in-memory `SessionStore` seeded by the operator (there is no
/// production path that writes sessions from inside this fabric).
#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, SessionRow>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, token: impl Into<String>, row: SessionRow) {
        self.sessions.write().unwrap_or_else(|e| e.into_inner()).insert(token.into(), row);
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn lookup(&self, token: &str) -> Result<Option<SessionRow>> {
        Ok(self.sessions.read().unwrap_or_else(|e| e.into_inner()).get(token).cloned())
    }
}

/// An in-memory `ChatRoomStore`.
#[derive(Default)]
pub struct InMemoryChatRoomStore {
    rooms: RwLock<HashMap<String, ChatRoom>>,
}

impl InMemoryChatRoomStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, room: ChatRoom) {
        self.rooms
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(room.identifier.clone(), room);
    }
}

#[async_trait]
impl ChatRoomStore for InMemoryChatRoomStore {
    async fn fetch(&self, chat_room_identifier: &str) -> Result<Option<ChatRoom>> {
        Ok(self
            .rooms
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(chat_room_identifier)
            .cloned())
    }
}

/// An in-memory `ChatMessageStore`; messages are appended into a per-room
/// `Vec` kept sorted ascending by timestamp.
#[derive(Default)]
pub struct InMemoryChatMessageStore {
    rooms: RwLock<HashMap<String, Vec<ChatMessageRow>>>,
}

impl InMemoryChatMessageStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChatMessageStore for InMemoryChatMessageStore {
    async fn insert(&self, row: ChatMessageRow) -> Result<()> {
        let mut rooms = self.rooms.write().unwrap_or_else(|e| e.into_inner());
        let entries = rooms.entry(row.chat_room_identifier.clone()).or_default();
        let pos = entries
            .partition_point(|r| r.message_timestamp_identifier < row.message_timestamp_identifier);
        entries.insert(pos, row);
        Ok(())
    }

    async fn before(
        &self,
        chat_room_identifier: &str,
        before_timestamp: i64,
        limit: u32,
    ) -> Result<Vec<ChatMessageRow>> {
        let rooms = self.rooms.read().unwrap_or_else(|e| e.into_inner());
        let Some(entries) = rooms.get(chat_room_identifier) else {
            return Ok(Vec::new());
        };
        let mut out: Vec<ChatMessageRow> = entries
            .iter()
            .rev()
            .filter(|r| r.message_timestamp_identifier < before_timestamp)
            .take(limit as usize)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.message_timestamp_identifier.cmp(&a.message_timestamp_identifier));
        Ok(out)
    }

    async fn latest(&self, chat_room_identifier: &str) -> Result<Option<ChatMessageRow>> {
        let rooms = self.rooms.read().unwrap_or_else(|e| e.into_inner());
        Ok(rooms
            .get(chat_room_identifier)
            .and_then(|entries| entries.last())
            .cloned())
    }

    async fn count_newer_than(
        &self,
        chat_room_identifier: &str,
        after_timestamp: i64,
        scan_limit: u32,
    ) -> Result<u32> {
        let rooms = self.rooms.read().unwrap_or_else(|e| e.into_inner());
        let Some(entries) = rooms.get(chat_room_identifier) else {
            return Ok(0);
        };
        let mut count = 0u32;
        for row in entries.iter().rev().take(scan_limit as usize) {
            if row.message_timestamp_identifier > after_timestamp {
                count += 1;
            } else {
                break;
            }
        }
        Ok(count)
    }
}

/// An in-memory `LastMessageReadStore`, keyed by `(room, user)`.
#[derive(Default)]
pub struct InMemoryLastMessageReadStore {
    marks: RwLock<HashMap<(String, String), i64>>,
}

impl InMemoryLastMessageReadStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LastMessageReadStore for InMemoryLastMessageReadStore {
    async fn set(
        &self,
        chat_room_identifier: &str,
        app_user_identifier: &str,
        message_timestamp_identifier: i64,
    ) -> Result<()> {
        let key = (chat_room_identifier.to_string(), app_user_identifier.to_string());
        // Delete-then-insert is just "overwrite the single entry" here; the
        // point (`§8`) is that at most one row per (user, room) ever exists.
        self.marks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key, message_timestamp_identifier);
        Ok(())
    }

    async fn get(
        &self,
        chat_room_identifier: &str,
        app_user_identifier: &str,
    ) -> Result<Option<i64>> {
        let key = (chat_room_identifier.to_string(), app_user_identifier.to_string());
        Ok(self.marks.read().unwrap_or_else(|e| e.into_inner()).get(&key).copied())
    }
}

/// An in-memory `CustomDataStore`.
#[derive(Default)]
pub struct InMemoryCustomDataStore {
    data: RwLock<HashMap<String, Value>>,
}

impl InMemoryCustomDataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, app_user_identifier: impl Into<String>, value: Value) {
        self.data
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(app_user_identifier.into(), value);
    }
}

#[async_trait]
impl CustomDataStore for InMemoryCustomDataStore {
    async fn get(&self, app_user_identifier: &str) -> Result<Option<Value>> {
        Ok(self.data.read().unwrap_or_else(|e| e.into_inner()).get(app_user_identifier).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chat_fabric_protocol::ChatRoomType;

    #[tokio::test]
    async fn chat_message_store_orders_before_query_descending_and_caps_at_limit() {
        let store = InMemoryChatMessageStore::new();
        for ts in [10, 20, 30, 40, 50] {
            store
                .insert(ChatMessageRow {
                    message_timestamp_identifier: ts,
                    chat_room_identifier: "r1".into(),
                    app_user_identifier: "u1".into(),
                    message: Value::Null,
                })
                .await
                .unwrap();
        }
        let page = store.before("r1", 50, 2).await.unwrap();
        assert_eq!(
            page.iter()
                .map(|r| r.message_timestamp_identifier)
                .collect::<Vec<_>>(),
            vec![40, 30]
        );
    }

    #[tokio::test]
    async fn count_newer_than_stops_at_first_non_newer_message() {
        let store = InMemoryChatMessageStore::new();
        for ts in [10, 20, 30, 40, 50] {
            store
                .insert(ChatMessageRow {
                    message_timestamp_identifier: ts,
                    chat_room_identifier: "r1".into(),
                    app_user_identifier: "u1".into(),
                    message: Value::Null,
                })
                .await
                .unwrap();
        }
        let count = store.count_newer_than("r1", 25, 100).await.unwrap();
        assert_eq!(count, 3); // 30, 40, 50
    }

    #[tokio::test]
    async fn last_message_read_set_is_idempotent_per_user_room() {
        let store = InMemoryLastMessageReadStore::new();
        store.set("r1", "u1", 100).await.unwrap();
        store.set("r1", "u1", 200).await.unwrap();
        assert_eq!(store.get("r1", "u1").await.unwrap(), Some(200));
    }

    #[tokio::test]
    async fn chat_room_membership_respects_mass_public_exemption() {
        let store = InMemoryChatRoomStore::new();
        store.insert(ChatRoom {
            identifier: "r1".into(),
            room_type: ChatRoomType::MassPublic,
            app_users: vec!["u1".into()],
        });
        let room = store.fetch("r1").await.unwrap().unwrap();
        assert!(room.is_member("anyone"));
    }
}
