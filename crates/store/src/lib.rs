//! Trait interfaces for the five durable tables this fabric treats as an
//! external collaborator — session, chat room, chat message,
//! last-message-read, and custom-data (`§1`, `§6`) — plus an in-memory
//! reference implementation of each for tests and backend-less operation.

pub mod error;
pub mod memory;
pub mod traits;
pub mod types;

pub use error::{Error, Result};
pub use memory::{
    InMemoryChatMessageStore, InMemoryChatRoomStore, InMemoryCustomDataStore,
    InMemoryLastMessageReadStore, InMemorySessionStore,
};
pub use traits::{ChatMessageStore, ChatRoomStore, CustomDataStore, LastMessageReadStore, SessionStore};
pub use types::{ChatMessageRow, ChatRoom, SessionRow};
