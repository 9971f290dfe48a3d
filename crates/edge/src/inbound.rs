//! `InboundMessageService` (`§4.6`): dispatches client-origin frames by
//! type. Anti-spam gating and "no operational router" rejection are applied
//! by the caller and by the individual handlers respectively — see
//! `crate::gateway` for the former and `round_robin_send`'s `Err` arm below
//! for the latter (`§4.4`).

use std::sync::Arc;

use tracing::warn;

use chat_fabric_common::ids::IdAllocator;
use chat_fabric_protocol::{
    ClientReply, ClientRequest, ErrorShape, GetLastChatRoomMessageItem, HistoryEntry, LastMessageReadView,
    RouterFrame, UnreadCountItem, error_codes,
};
use chat_fabric_store::{ChatMessageRow, ChatMessageStore, ChatRoomStore, CustomDataStore, LastMessageReadStore};

use crate::membership::{MessageKind, validate_membership};
use crate::performance::PerformanceCounters;
use crate::router_pool::RouterPool;

pub struct InboundMessageService {
    chat_rooms: Arc<dyn ChatRoomStore>,
    chat_messages: Arc<dyn ChatMessageStore>,
    last_message_read: Arc<dyn LastMessageReadStore>,
    custom_data: Arc<dyn CustomDataStore>,
    router_pool: Arc<RouterPool>,
    id_allocator: Arc<IdAllocator>,
    performance: Arc<PerformanceCounters>,
    max_history_limit: u32,
}

impl InboundMessageService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        chat_rooms: Arc<dyn ChatRoomStore>,
        chat_messages: Arc<dyn ChatMessageStore>,
        last_message_read: Arc<dyn LastMessageReadStore>,
        custom_data: Arc<dyn CustomDataStore>,
        router_pool: Arc<RouterPool>,
        id_allocator: Arc<IdAllocator>,
        performance: Arc<PerformanceCounters>,
        max_history_limit: u32,
    ) -> Self {
        Self {
            chat_rooms,
            chat_messages,
            last_message_read,
            custom_data,
            router_pool,
            id_allocator,
            performance,
            max_history_limit,
        }
    }

    pub async fn handle(&self, app_user_identifier: &str, request: ClientRequest) -> Option<ClientReply> {
        match request {
            ClientRequest::Routable {
                chat_room_identifier,
                message,
            } => self.handle_routable(app_user_identifier, chat_room_identifier, message).await,

            ClientRequest::GetHistory {
                chat_room_identifier,
                from_message_timestamp_identifier,
                limit,
            } => {
                self.handle_get_history(app_user_identifier, chat_room_identifier, from_message_timestamp_identifier, limit)
                    .await
            },

            ClientRequest::SetLastMessageRead {
                chat_room_identifier,
                message_timestamp_identifier,
            } => {
                self.handle_set_last_message_read(app_user_identifier, &chat_room_identifier, message_timestamp_identifier)
                    .await
                    .err()
                    .map(ClientReply::error)
            },

            ClientRequest::GetLastMessagesRead { chat_room_identifier } => {
                self.handle_get_last_messages_read(app_user_identifier, chat_room_identifier).await
            },

            ClientRequest::GetLastChatRoomMessage { chat_room_identifiers } => {
                self.handle_get_last_chat_room_message(app_user_identifier, chat_room_identifiers).await
            },

            ClientRequest::GetUnreadMessagesCount { chat_room_identifiers } => {
                self.handle_get_unread_messages_count(app_user_identifier, chat_room_identifiers).await
            },
        }
    }

    async fn handle_routable(&self, sender: &str, chat_room_identifier: String, message: serde_json::Value) -> Option<ClientReply> {
        let room = match validate_membership(self.chat_rooms.as_ref(), &chat_room_identifier, sender, MessageKind::Routable).await {
            Ok(room) => room,
            Err(e) => return Some(ClientReply::error(e)),
        };

        let message_timestamp_identifier = self.id_allocator.next_id() as i64;

        if let Err(err) = self
            .chat_messages
            .insert(ChatMessageRow {
                message_timestamp_identifier,
                chat_room_identifier: chat_room_identifier.clone(),
                app_user_identifier: sender.to_string(),
                message: message.clone(),
            })
            .await
        {
            self.performance.record("chat_message", "insert", true);
            warn!(error = %err, "edge: failed to persist routable message");
        } else {
            self.performance.record("chat_message", "insert", false);
        }

        let custom_data = self.custom_data.get(sender).await.unwrap_or_default();

        let frame = RouterFrame::Routable {
            chat_room_identifier: chat_room_identifier.clone(),
            app_user_identifier: sender.to_string(),
            application_user_identifiers: room.app_users.clone(),
            message_timestamp_identifier,
            message,
            custom_data,
        };

        if self.router_pool.round_robin_send(&frame).is_err() {
            return Some(ClientReply::error(ErrorShape::new(
                error_codes::DNS_CONNECTIONS_EXCEPTION,
                "no operational router available",
            )));
        }

        // `§4.6`: SET_LAST_MESSAGE_READ is a separate follow-up step after
        // the ROUTABLE send completes, not inlined into the same backend
        // call.
        if let Err(err) = self
            .handle_set_last_message_read(sender, &chat_room_identifier, message_timestamp_identifier)
            .await
        {
            warn!(error_code = err.error_code, "edge: follow-up SET_LAST_MESSAGE_READ after ROUTABLE failed");
        }

        None
    }

    async fn handle_set_last_message_read(
        &self,
        sender: &str,
        chat_room_identifier: &str,
        message_timestamp_identifier: i64,
    ) -> Result<(), ErrorShape> {
        let room = validate_membership(self.chat_rooms.as_ref(), chat_room_identifier, sender, MessageKind::SetLastMessageRead).await?;

        if let Err(err) = self
            .last_message_read
            .set(chat_room_identifier, sender, message_timestamp_identifier)
            .await
        {
            self.performance.record("last_message_read", "set", true);
            warn!(error = %err, "edge: failed to persist last-message-read mark");
        } else {
            self.performance.record("last_message_read", "set", false);
        }

        let custom_data = self.custom_data.get(sender).await.unwrap_or_default();

        let frame = RouterFrame::SetLastMessageRead {
            chat_room_identifier: chat_room_identifier.to_string(),
            app_user_identifier: sender.to_string(),
            application_user_identifiers: room.app_users,
            message_timestamp_identifier,
            custom_data,
        };
        if self.router_pool.round_robin_send(&frame).is_err() {
            return Err(ErrorShape::new(error_codes::DNS_CONNECTIONS_EXCEPTION, "no operational router available"));
        }
        Ok(())
    }

    async fn handle_get_history(
        &self,
        sender: &str,
        chat_room_identifier: String,
        from_message_timestamp_identifier: i64,
        limit: Option<u32>,
    ) -> Option<ClientReply> {
        if let Err(e) = validate_membership(self.chat_rooms.as_ref(), &chat_room_identifier, sender, MessageKind::GetHistory).await {
            return Some(ClientReply::error(e));
        }

        let limit = limit
            .unwrap_or(chat_fabric_protocol::DEFAULT_HISTORY_LIMIT)
            .min(self.max_history_limit);

        let rows = match self.chat_messages.before(&chat_room_identifier, from_message_timestamp_identifier, limit).await {
            Ok(rows) => {
                self.performance.record("chat_message", "before", false);
                rows
            },
            Err(err) => {
                self.performance.record("chat_message", "before", true);
                warn!(error = %err, "edge: failed to query chat history");
                Vec::new()
            },
        };

        let mut payload = Vec::with_capacity(rows.len());
        for row in rows {
            let custom_data = self.custom_data.get(&row.app_user_identifier).await.unwrap_or_default();
            payload.push(HistoryEntry {
                message_timestamp_identifier: row.message_timestamp_identifier,
                chat_room_identifier: row.chat_room_identifier,
                app_user_identifier: row.app_user_identifier,
                message: row.message,
                custom_data,
            });
        }

        Some(ClientReply::GetHistory {
            chat_room_identifier,
            payload,
        })
    }

    async fn handle_get_last_messages_read(&self, sender: &str, chat_room_identifier: String) -> Option<ClientReply> {
        let room = match validate_membership(self.chat_rooms.as_ref(), &chat_room_identifier, sender, MessageKind::GetLastMessagesRead).await {
            Ok(room) => room,
            Err(e) => return Some(ClientReply::error(e)),
        };

        let mut payload = Vec::new();
        for app_user_identifier in &room.app_users {
            let mark = self.last_message_read.get(&chat_room_identifier, app_user_identifier).await.unwrap_or_default();
            if let Some(message_timestamp_identifier) = mark {
                let custom_data = self.custom_data.get(app_user_identifier).await.unwrap_or_default();
                payload.push(LastMessageReadView {
                    chat_room_identifier: chat_room_identifier.clone(),
                    app_user_identifier: app_user_identifier.clone(),
                    message_timestamp_identifier,
                    custom_data,
                });
            }
        }

        Some(ClientReply::GetLastMessagesRead {
            chat_room_identifier,
            payload,
        })
    }

    async fn handle_get_last_chat_room_message(&self, sender: &str, chat_room_identifiers: Vec<String>) -> Option<ClientReply> {
        let mut payload = Vec::with_capacity(chat_room_identifiers.len());
        for chat_room_identifier in chat_room_identifiers {
            // `§4.6`: membership is validated *inside* this loop, one id at
            // a time, not once up front for the whole list.
            if let Err(e) = validate_membership(self.chat_rooms.as_ref(), &chat_room_identifier, sender, MessageKind::GetLastChatRoomMessage).await {
                return Some(ClientReply::error(e));
            }

            let latest = self.chat_messages.latest(&chat_room_identifier).await.unwrap_or_default();
            let item = match latest {
                Some(row) => {
                    let last_read = self.last_message_read.get(&chat_room_identifier, sender).await.unwrap_or_default();
                    let has_unread_messages = last_read.is_none_or(|ts| ts < row.message_timestamp_identifier);
                    GetLastChatRoomMessageItem {
                        chat_room_identifier: chat_room_identifier.clone(),
                        has_unread_messages,
                        last_message_text: extract_text(&row.message),
                        message_timestamp_identifier: Some(row.message_timestamp_identifier),
                    }
                },
                None => GetLastChatRoomMessageItem {
                    chat_room_identifier: chat_room_identifier.clone(),
                    has_unread_messages: false,
                    last_message_text: None,
                    message_timestamp_identifier: None,
                },
            };
            payload.push(item);
        }

        Some(ClientReply::GetLastChatRoomMessage { payload })
    }

    async fn handle_get_unread_messages_count(&self, sender: &str, chat_room_identifiers: Vec<String>) -> Option<ClientReply> {
        // `§4.6`: reject up front, before any backend call.
        if chat_room_identifiers.len() > chat_fabric_protocol::MAX_UNREAD_COUNT_ROOMS {
            return Some(ClientReply::error(ErrorShape::new(
                error_codes::CHAT_ROOM_IDENTIFIERS_LIST_LENGTH,
                "at most 10 chat rooms may be queried at once",
            )));
        }

        let mut payload = Vec::with_capacity(chat_room_identifiers.len());
        for chat_room_identifier in chat_room_identifiers {
            let after = self
                .last_message_read
                .get(&chat_room_identifier, sender)
                .await
                .unwrap_or_default()
                .unwrap_or(i64::MIN);
            let unread_messages_count = self
                .chat_messages
                .count_newer_than(&chat_room_identifier, after, chat_fabric_protocol::UNREAD_COUNT_SCAN_LIMIT)
                .await
                .unwrap_or(0);
            payload.push(UnreadCountItem {
                chat_room_identifier,
                unread_messages_count,
            });
        }

        Some(ClientReply::GetUnreadMessagesCount { payload })
    }
}

/// Best-effort extraction of a human-readable preview from an
/// arbitrary client-controlled message payload: a `text` string field, by
/// convention (`§4.6`, `GET_LAST_CHAT_ROOM_MESSAGE`).
fn extract_text(message: &serde_json::Value) -> Option<String> {
    message.get("text").and_then(serde_json::Value::as_str).map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chat_fabric_protocol::ChatRoomType;
    use chat_fabric_store::{
        ChatRoom, InMemoryChatMessageStore, InMemoryChatRoomStore, InMemoryCustomDataStore, InMemoryLastMessageReadStore,
    };

    fn service() -> (InboundMessageService, Arc<InMemoryChatRoomStore>, Arc<RouterPool>) {
        let chat_rooms = Arc::new(InMemoryChatRoomStore::new());
        let router_pool = Arc::new(RouterPool::new());
        let service = InboundMessageService::new(
            chat_rooms.clone(),
            Arc::new(InMemoryChatMessageStore::new()),
            Arc::new(InMemoryLastMessageReadStore::new()),
            Arc::new(InMemoryCustomDataStore::new()),
            router_pool.clone(),
            Arc::new(IdAllocator::new()),
            Arc::new(PerformanceCounters::new()),
            chat_fabric_protocol::DEFAULT_HISTORY_LIMIT * 10,
        );
        (service, chat_rooms, router_pool)
    }

    #[tokio::test]
    async fn routable_to_unknown_room_returns_chat_room_does_not_exist() {
        let (service, _rooms, _pool) = service();
        let reply = service.handle_routable("u1", "ghost".into(), serde_json::json!({"text": "hi"})).await;
        match reply {
            Some(ClientReply::Error { exception }) => assert_eq!(exception.error_code, error_codes::CHAT_ROOM_DOES_NOT_EXIST),
            other => panic!("expected error reply, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn routable_with_no_operational_router_returns_dns_connections_exception() {
        let (service, rooms, _pool) = service();
        rooms.insert(ChatRoom {
            identifier: "r1".into(),
            room_type: ChatRoomType::Regular,
            app_users: vec!["u1".into()],
        });
        let reply = service.handle_routable("u1", "r1".into(), serde_json::json!({"text": "hi"})).await;
        match reply {
            Some(ClientReply::Error { exception }) => assert_eq!(exception.error_code, error_codes::DNS_CONNECTIONS_EXCEPTION),
            other => panic!("expected error reply, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn get_unread_messages_count_rejects_more_than_ten_rooms_up_front() {
        let (service, _rooms, _pool) = service();
        let ids: Vec<String> = (0..11).map(|i| format!("r{i}")).collect();
        let reply = service.handle_get_unread_messages_count("u1", ids).await;
        match reply {
            Some(ClientReply::GetUnreadMessagesCount { .. }) => panic!("should have been rejected"),
            Some(ClientReply::Error { exception }) => {
                assert_eq!(exception.error_code, error_codes::CHAT_ROOM_IDENTIFIERS_LIST_LENGTH)
            },
            other => panic!("unexpected reply {other:?}"),
        }
    }

    #[tokio::test]
    async fn get_last_chat_room_message_validates_membership_per_id_and_aborts_on_first_failure() {
        let (service, rooms, _pool) = service();
        rooms.insert(ChatRoom {
            identifier: "r1".into(),
            room_type: ChatRoomType::Regular,
            app_users: vec!["u1".into()],
        });
        let reply = service
            .handle_get_last_chat_room_message("u1", vec!["r1".into(), "ghost".into()])
            .await;
        match reply {
            Some(ClientReply::Error { exception }) => assert_eq!(exception.error_code, error_codes::CHAT_ROOM_DOES_NOT_EXIST),
            other => panic!("expected error for the second (missing) room, got {other:?}"),
        }
    }

    #[test]
    fn extract_text_reads_the_text_field_by_convention() {
        assert_eq!(extract_text(&serde_json::json!({"text": "hello"})), Some("hello".to_string()));
        assert_eq!(extract_text(&serde_json::json!({"other": 1})), None);
    }
}
