//! Wire protocol shared by the edge server and the central router.
//!
//! Every frame exchanged over any of the three websocket surfaces (client↔ES,
//! ES↔CR) is a JSON object carrying a `type` discriminant. Rather than a
//! runtime string-keyed dispatch table, every surface is modeled here as a
//! `#[serde(tag = "type")]` enum so an unrecognized `type` fails to parse
//! instead of being silently dropped.

pub mod chat_room;
pub mod client;
pub mod error;
pub mod manager;
pub mod router;

pub use chat_room::ChatRoomType;
pub use client::{
    check_required_fields, ClientDelivery, ClientReply, ClientRequest, GetLastChatRoomMessageItem,
    HistoryEntry, LastMessageReadView, UnreadCountItem,
};
pub use error::{ErrorShape, error_codes};
pub use manager::ManagerFrame;
pub use router::{RouterFrame, ServerModeValue};

/// Identifies a tenant application; the trailing colon-segment of a token.
pub type ApplicationId = String;
/// Identifies a user within an application, unique across the whole fabric.
pub type AppUserId = String;
/// Identifies one device belonging to an `AppUserId`.
pub type DeviceId = String;
/// Identifies a chat room.
pub type ChatRoomId = String;

/// Default `limit` for `GET_HISTORY` when the client omits it.
pub const DEFAULT_HISTORY_LIMIT: u32 = 20;
/// Upper bound on the number of chat rooms a single `GET_UNREAD_MESSAGES_COUNT`
/// request may name before it is rejected without touching the store.
pub const MAX_UNREAD_COUNT_ROOMS: usize = 10;
/// Internal cap on how many newer-than-last-read messages are counted per
/// room for `GET_UNREAD_MESSAGES_COUNT`.
pub const UNREAD_COUNT_SCAN_LIMIT: u32 = 100;
/// Anti-spam window and message budget (`§4.9`).
pub const ANTI_SPAM_WINDOW_SECS: u64 = 60;
pub const ANTI_SPAM_MAX_MESSAGES: u32 = 300;
/// `click_action` stamped onto every offline-notification payload handed to
/// the push gateway.
pub const OFFLINE_NOTIFICATION_CLICK_ACTION: &str = "CHAT_NOTIFICATION";
