//! Trait interfaces for the five durable tables this system treats as an
//! external collaborator (`§1` OUT OF SCOPE, `§6`). Each is small and
//! independently mockable; production deployments implement these against
//! their table store of choice, the workspace ships only the in-memory
//! reference implementation in [`crate::memory`].

use async_trait::async_trait;
use serde_json::Value;

use crate::{
    error::Result,
    types::{ChatMessageRow, ChatRoom, SessionRow},
};

/// `token → (app_user_id, device_id)` lookups (`§4.5` step 3).
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn lookup(&self, token: &str) -> Result<Option<SessionRow>>;
}

/// Chat room metadata and membership (`§4.6`).
#[async_trait]
pub trait ChatRoomStore: Send + Sync {
    async fn fetch(&self, chat_room_identifier: &str) -> Result<Option<ChatRoom>>;
}

/// Persisted chat messages, keyed by room and ordered by
/// `message_timestamp_identifier` (`§4.6`, `§8` invariant 7).
#[async_trait]
pub trait ChatMessageStore: Send + Sync {
    async fn insert(&self, row: ChatMessageRow) -> Result<()>;

    /// Messages strictly before `before_timestamp`, newest first, capped at
    /// `limit` (`GET_HISTORY`).
    async fn before(
        &self,
        chat_room_identifier: &str,
        before_timestamp: i64,
        limit: u32,
    ) -> Result<Vec<ChatMessageRow>>;

    /// The single newest message in a room, if any (`GET_LAST_CHAT_ROOM_MESSAGE`).
    async fn latest(&self, chat_room_identifier: &str) -> Result<Option<ChatMessageRow>>;

    /// Count of messages strictly newer than `after_timestamp`, scanning at
    /// most `scan_limit` of the newest messages in descending order and
    /// stopping as soon as a message is not strictly newer
    /// (`GET_UNREAD_MESSAGES_COUNT`, `§4.6`).
    async fn count_newer_than(
        &self,
        chat_room_identifier: &str,
        after_timestamp: i64,
        scan_limit: u32,
    ) -> Result<u32>;
}

/// Per-`(app_user_id, chat_room_identifier)` last-read timestamp
/// (`SET_LAST_MESSAGE_READ`, `GET_LAST_MESSAGES_READ`).
#[async_trait]
pub trait LastMessageReadStore: Send + Sync {
    /// Delete-then-insert semantics: at most one row per `(user, room)`
    /// survives (`§8` idempotence property).
    async fn set(
        &self,
        chat_room_identifier: &str,
        app_user_identifier: &str,
        message_timestamp_identifier: i64,
    ) -> Result<()>;

    async fn get(
        &self,
        chat_room_identifier: &str,
        app_user_identifier: &str,
    ) -> Result<Option<i64>>;
}

/// Cached per-user custom data used to annotate message rows with their
/// author's profile blob (`§4.6`).
#[async_trait]
pub trait CustomDataStore: Send + Sync {
    async fn get(&self, app_user_identifier: &str) -> Result<Option<Value>>;
}
