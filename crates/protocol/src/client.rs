//! Frames exchanged on the client↔edge-server websocket surface (`§6.1`).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ErrorShape;

/// A request frame sent by a client (`§4.6`).
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ClientRequest {
    #[serde(rename = "ROUTABLE")]
    Routable {
        chat_room_identifier: String,
        message: Value,
    },

    #[serde(rename = "GET_HISTORY")]
    GetHistory {
        chat_room_identifier: String,
        from_message_timestamp_identifier: i64,
        #[serde(default)]
        limit: Option<u32>,
    },

    #[serde(rename = "SET_LAST_MESSAGE_READ")]
    SetLastMessageRead {
        chat_room_identifier: String,
        message_timestamp_identifier: i64,
    },

    #[serde(rename = "GET_LAST_MESSAGES_READ")]
    GetLastMessagesRead { chat_room_identifier: String },

    #[serde(rename = "GET_LAST_CHAT_ROOM_MESSAGE")]
    GetLastChatRoomMessage {
        chat_room_identifiers: Vec<String>,
    },

    #[serde(rename = "GET_UNREAD_MESSAGES_COUNT")]
    GetUnreadMessagesCount {
        chat_room_identifiers: Vec<String>,
    },
}

impl ClientRequest {
    /// The `type` discriminant, for logging (`§6.6`: per-message dispatch is
    /// logged at trace/debug granularity).
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Routable { .. } => "ROUTABLE",
            Self::GetHistory { .. } => "GET_HISTORY",
            Self::SetLastMessageRead { .. } => "SET_LAST_MESSAGE_READ",
            Self::GetLastMessagesRead { .. } => "GET_LAST_MESSAGES_READ",
            Self::GetLastChatRoomMessage { .. } => "GET_LAST_CHAT_ROOM_MESSAGE",
            Self::GetUnreadMessagesCount { .. } => "GET_UNREAD_MESSAGES_COUNT",
        }
    }
}

/// The mandatory fields of each `ClientRequest` variant, keyed by wire
/// `type` (`§4.6`). `limit` on `GET_HISTORY` is the only optional field
/// across every variant, and is deliberately absent here.
fn required_fields(kind: &str) -> Option<&'static [&'static str]> {
    match kind {
        "ROUTABLE" => Some(&["chat_room_identifier", "message"]),
        "GET_HISTORY" => Some(&["chat_room_identifier", "from_message_timestamp_identifier"]),
        "SET_LAST_MESSAGE_READ" => Some(&["chat_room_identifier", "message_timestamp_identifier"]),
        "GET_LAST_MESSAGES_READ" => Some(&["chat_room_identifier"]),
        "GET_LAST_CHAT_ROOM_MESSAGE" => Some(&["chat_room_identifiers"]),
        "GET_UNREAD_MESSAGES_COUNT" => Some(&["chat_room_identifiers"]),
        _ => None,
    }
}

/// Checks a parsed-but-not-yet-typed client frame for its mandatory fields
/// (`§7`): a JSON parse failure is 10004 (`INVALID_MESSAGE_FORMAT`); a
/// structurally-valid JSON object missing a mandatory field is a distinct
/// 10005 (`MISSING_REQUIRED_FIELD`) that names the offending field. An
/// unrecognized or absent `type` is still 10004, since there is no field
/// list to check it against.
pub fn check_required_fields(value: &Value) -> Result<(), ErrorShape> {
    let Some(kind) = value.get("type").and_then(Value::as_str) else {
        return Err(ErrorShape::new(
            crate::error_codes::INVALID_MESSAGE_FORMAT,
            "missing or invalid \"type\" field",
        ));
    };
    let Some(fields) = required_fields(kind) else {
        return Err(ErrorShape::new(
            crate::error_codes::INVALID_MESSAGE_FORMAT,
            format!("unrecognized message type \"{kind}\""),
        ));
    };
    for field in fields {
        if value.get(field).is_none() {
            return Err(ErrorShape::new(
                crate::error_codes::MISSING_REQUIRED_FIELD,
                format!("missing required field \"{field}\""),
            )
            .with_extra(serde_json::json!({ "field": field })));
        }
    }
    Ok(())
}

/// A single annotated row returned by `GET_HISTORY`.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    pub message_timestamp_identifier: i64,
    pub chat_room_identifier: String,
    pub app_user_identifier: String,
    pub message: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_data: Option<Value>,
}

/// A single annotated row returned by `GET_LAST_MESSAGES_READ`. Note this
/// type has no `identifier` field by construction — the open question in
/// `§9` about mutating a possibly-shared cached row in place is resolved by
/// never carrying that field past the store layer in the first place.
#[derive(Debug, Clone, Serialize)]
pub struct LastMessageReadView {
    pub chat_room_identifier: String,
    pub app_user_identifier: String,
    pub message_timestamp_identifier: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_data: Option<Value>,
}

/// One entry of a `GET_LAST_CHAT_ROOM_MESSAGE` reply.
#[derive(Debug, Clone, Serialize)]
pub struct GetLastChatRoomMessageItem {
    pub chat_room_identifier: String,
    pub has_unread_messages: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_message_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_timestamp_identifier: Option<i64>,
}

/// One entry of a `GET_UNREAD_MESSAGES_COUNT` reply.
#[derive(Debug, Clone, Serialize)]
pub struct UnreadCountItem {
    pub chat_room_identifier: String,
    pub unread_messages_count: u32,
}

/// A reply frame sent by the edge server directly to the requesting client.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ClientReply {
    #[serde(rename = "GET_HISTORY")]
    GetHistory {
        chat_room_identifier: String,
        payload: Vec<HistoryEntry>,
    },

    #[serde(rename = "GET_LAST_MESSAGES_READ")]
    GetLastMessagesRead {
        chat_room_identifier: String,
        payload: Vec<LastMessageReadView>,
    },

    #[serde(rename = "GET_LAST_CHAT_ROOM_MESSAGE")]
    GetLastChatRoomMessage {
        payload: Vec<GetLastChatRoomMessageItem>,
    },

    #[serde(rename = "GET_UNREAD_MESSAGES_COUNT")]
    GetUnreadMessagesCount { payload: Vec<UnreadCountItem> },

    #[serde(rename = "ERROR")]
    Error { exception: ErrorShape },
}

impl ClientReply {
    pub fn error(exception: ErrorShape) -> Self {
        Self::Error { exception }
    }
}

/// The shape a CR-routed frame takes once it reaches a client device
/// (`§4.7`): identical to the corresponding `RouterFrame` variant minus the
/// routing-only `application_user_identifiers` list.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ClientDelivery {
    #[serde(rename = "ROUTABLE")]
    Routable {
        chat_room_identifier: String,
        app_user_identifier: String,
        message_timestamp_identifier: i64,
        message: Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        custom_data: Option<Value>,
    },

    #[serde(rename = "SYSTEM_ROUTABLE")]
    SystemRoutable {
        chat_room_identifier: String,
        message_timestamp_identifier: i64,
        message: Value,
    },

    #[serde(rename = "SET_LAST_MESSAGE_READ")]
    SetLastMessageRead {
        chat_room_identifier: String,
        app_user_identifier: String,
        message_timestamp_identifier: i64,
        #[serde(skip_serializing_if = "Option::is_none")]
        custom_data: Option<Value>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_get_unread_messages_count_request() {
        let raw = serde_json::json!({
            "type": "GET_UNREAD_MESSAGES_COUNT",
            "chat_room_identifiers": ["r1", "r2"],
        });
        let req: ClientRequest = serde_json::from_value(raw).unwrap();
        match req {
            ClientRequest::GetUnreadMessagesCount {
                chat_room_identifiers,
            } => assert_eq!(chat_room_identifiers, vec!["r1", "r2"]),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn get_history_defaults_limit_to_none() {
        let raw = serde_json::json!({
            "type": "GET_HISTORY",
            "chat_room_identifier": "r1",
            "from_message_timestamp_identifier": 100,
        });
        let req: ClientRequest = serde_json::from_value(raw).unwrap();
        match req {
            ClientRequest::GetHistory { limit, .. } => assert_eq!(limit, None),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn error_reply_serializes_with_exception_envelope() {
        let reply = ClientReply::error(ErrorShape::new(10009, "chat room does not exist"));
        let encoded = serde_json::to_value(&reply).unwrap();
        assert_eq!(encoded["type"], "ERROR");
        assert_eq!(encoded["exception"]["error_code"], 10009);
    }

    #[test]
    fn missing_mandatory_field_is_10005_and_names_the_field() {
        let raw = serde_json::json!({
            "type": "ROUTABLE",
            "chat_room_identifier": "r1",
        });
        let err = check_required_fields(&raw).unwrap_err();
        assert_eq!(err.error_code, crate::error_codes::MISSING_REQUIRED_FIELD);
        assert_eq!(err.extra.unwrap()["field"], "message");
    }

    #[test]
    fn fully_populated_object_passes_the_required_field_check() {
        let raw = serde_json::json!({
            "type": "ROUTABLE",
            "chat_room_identifier": "r1",
            "message": {"text": "hi"},
        });
        assert!(check_required_fields(&raw).is_ok());
    }

    #[test]
    fn unrecognized_type_is_invalid_message_format_not_missing_field() {
        let raw = serde_json::json!({"type": "NOT_A_REAL_TYPE"});
        let err = check_required_fields(&raw).unwrap_err();
        assert_eq!(err.error_code, crate::error_codes::INVALID_MESSAGE_FORMAT);
    }

    #[test]
    fn missing_type_field_is_invalid_message_format() {
        let raw = serde_json::json!({"chat_room_identifier": "r1"});
        let err = check_required_fields(&raw).unwrap_err();
        assert_eq!(err.error_code, crate::error_codes::INVALID_MESSAGE_FORMAT);
    }
}
