//! Chat-room membership validation (`§4.6`), shared by every
//! `InboundMessageService` handler that needs it.

use chat_fabric_protocol::{ChatRoomType, error_codes, ErrorShape};
use chat_fabric_store::{ChatRoom, ChatRoomStore};
use tracing::error;

/// The six client message kinds that can ask for membership validation,
/// used only to decide whether a `MASS_PUBLIC`/`MASS_PRIVATE` room admits
/// this kind of request (`§4.6`: "REGULAR allows all; MASS_PUBLIC/
/// MASS_PRIVATE allow only ROUTABLE and GET_HISTORY").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Routable,
    GetHistory,
    SetLastMessageRead,
    GetLastMessagesRead,
    GetLastChatRoomMessage,
}

fn admissible(room_type: ChatRoomType, kind: MessageKind) -> bool {
    match room_type {
        ChatRoomType::Regular => true,
        ChatRoomType::MassPublic | ChatRoomType::MassPrivate => {
            matches!(kind, MessageKind::Routable | MessageKind::GetHistory)
        },
    }
}

/// Fetch and validate membership for one `(chat_room_identifier, sender)`
/// pair. A backend failure while fetching the room degrades to "room not
/// found" (`§7`: backend failures never propagate as a client-visible
/// internal error; they are logged and the operation returns empty).
pub async fn validate_membership(
    chat_rooms: &dyn ChatRoomStore,
    chat_room_identifier: &str,
    sender: &str,
    kind: MessageKind,
) -> Result<ChatRoom, ErrorShape> {
    let room = match chat_rooms.fetch(chat_room_identifier).await {
        Ok(room) => room,
        Err(err) => {
            error!(chat_room_identifier = %chat_room_identifier, error = %err, "edge: chat room store failure, treating as not found");
            None
        },
    };

    let Some(room) = room else {
        return Err(ErrorShape::new(
            error_codes::CHAT_ROOM_DOES_NOT_EXIST,
            "chat room does not exist",
        ));
    };

    if !admissible(room.room_type, kind) {
        return Err(ErrorShape::new(
            error_codes::INVALID_CHAT_ROOM_MESSAGE_TYPE,
            "message type not allowed in this chat room type",
        ));
    }

    if !room.is_member(sender) {
        return Err(ErrorShape::new(
            error_codes::USER_NOT_IN_CHAT_ROOM,
            "sender is not a member of this chat room",
        ));
    }

    Ok(room)
}
