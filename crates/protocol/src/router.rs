//! Frames exchanged on the edge↔router websocket surfaces (`§6.1`).
//!
//! Modeled as a single tagged-variant enum rather than a string-keyed
//! dispatch table (`§9`): an unrecognized `type` fails `serde`'s match and
//! the caller turns that into an `INVALID_MESSAGE_FORMAT`-family error
//! instead of silently dropping the frame.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::client::ClientDelivery;

/// `SERVER_MODE.message` only ever carries one literal value over the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerModeValue {
    #[serde(rename = "OPERATIONAL")]
    Operational,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RouterFrame {
    #[serde(rename = "ADD_APP_USER_WEBSOCKET")]
    AddAppUserWebsocket { application_user_identifier: String },

    #[serde(rename = "REMOVE_APP_USER_WEBSOCKET")]
    RemoveAppUserWebsocket { application_user_identifier: String },

    #[serde(rename = "FULL_SYNC")]
    FullSync {
        application_user_identifiers: Vec<String>,
    },

    #[serde(rename = "ROUTABLE")]
    Routable {
        chat_room_identifier: String,
        app_user_identifier: String,
        application_user_identifiers: Vec<String>,
        message_timestamp_identifier: i64,
        message: Value,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        custom_data: Option<Value>,
    },

    #[serde(rename = "SYSTEM_ROUTABLE")]
    SystemRoutable {
        chat_room_identifier: String,
        application_user_identifiers: Vec<String>,
        message_timestamp_identifier: i64,
        message: Value,
    },

    #[serde(rename = "SET_LAST_MESSAGE_READ")]
    SetLastMessageRead {
        chat_room_identifier: String,
        app_user_identifier: String,
        application_user_identifiers: Vec<String>,
        message_timestamp_identifier: i64,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        custom_data: Option<Value>,
    },

    #[serde(rename = "OFFLINE_NOTIFICATION")]
    OfflineNotification {
        application_user_identifiers: Vec<String>,
        chat_room_identifier: String,
        application_user_identifier: String,
        message: Value,
    },

    #[serde(rename = "SERVER_MODE")]
    ServerMode { message: ServerModeValue },
}

impl RouterFrame {
    /// The routing recipients for the three CR-dispatched kinds (`§4.3`);
    /// `None` for frames that never carry a recipient list.
    pub fn recipients(&self) -> Option<&[String]> {
        match self {
            Self::Routable {
                application_user_identifiers,
                ..
            }
            | Self::SystemRoutable {
                application_user_identifiers,
                ..
            }
            | Self::SetLastMessageRead {
                application_user_identifiers,
                ..
            } => Some(application_user_identifiers),
            _ => None,
        }
    }

    /// Whether unknown recipients of this frame produce an
    /// `OFFLINE_NOTIFICATION` back to the sender (`§4.3`: ROUTABLE only).
    pub fn produces_offline_notification(&self) -> bool {
        matches!(self, Self::Routable { .. })
    }

    /// Project a CR-dispatched frame into the shape delivered to a local
    /// client device, with the routing-only `application_user_identifiers`
    /// list removed (`§4.7`). Returns `None` for frames never delivered to
    /// clients directly.
    pub fn into_client_delivery(self) -> Option<ClientDelivery> {
        match self {
            Self::Routable {
                chat_room_identifier,
                app_user_identifier,
                message_timestamp_identifier,
                message,
                custom_data,
                ..
            } => Some(ClientDelivery::Routable {
                chat_room_identifier,
                app_user_identifier,
                message_timestamp_identifier,
                message,
                custom_data,
            }),
            Self::SystemRoutable {
                chat_room_identifier,
                message_timestamp_identifier,
                message,
                ..
            } => Some(ClientDelivery::SystemRoutable {
                chat_room_identifier,
                message_timestamp_identifier,
                message,
            }),
            Self::SetLastMessageRead {
                chat_room_identifier,
                app_user_identifier,
                message_timestamp_identifier,
                custom_data,
                ..
            } => Some(ClientDelivery::SetLastMessageRead {
                chat_room_identifier,
                app_user_identifier,
                message_timestamp_identifier,
                custom_data,
            }),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_type_fails_to_parse() {
        let raw = serde_json::json!({"type": "NOT_A_REAL_TYPE"});
        let parsed: Result<RouterFrame, _> = serde_json::from_value(raw);
        assert!(parsed.is_err());
    }

    #[test]
    fn routable_round_trips_and_exposes_recipients() {
        let frame = RouterFrame::Routable {
            chat_room_identifier: "room-1".into(),
            app_user_identifier: "u1".into(),
            application_user_identifiers: vec!["u1".into(), "u2".into()],
            message_timestamp_identifier: 42,
            message: serde_json::json!({"text": "hi"}),
            custom_data: None,
        };
        let encoded = serde_json::to_string(&frame).unwrap();
        let decoded: RouterFrame = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.recipients(), Some(&["u1".to_string(), "u2".to_string()][..]));
        assert!(decoded.produces_offline_notification());
    }

    #[test]
    fn system_routable_and_set_last_message_read_never_produce_offline_notifications() {
        let system = RouterFrame::SystemRoutable {
            chat_room_identifier: "r".into(),
            application_user_identifiers: vec!["u1".into()],
            message_timestamp_identifier: 1,
            message: Value::Null,
        };
        let read = RouterFrame::SetLastMessageRead {
            chat_room_identifier: "r".into(),
            app_user_identifier: "u1".into(),
            application_user_identifiers: vec!["u1".into()],
            message_timestamp_identifier: 1,
            custom_data: None,
        };
        assert!(!system.produces_offline_notification());
        assert!(!read.produces_offline_notification());
    }

    #[test]
    fn client_delivery_drops_the_routing_only_recipient_list() {
        let frame = RouterFrame::Routable {
            chat_room_identifier: "room-1".into(),
            app_user_identifier: "u1".into(),
            application_user_identifiers: vec!["u1".into(), "u2".into()],
            message_timestamp_identifier: 42,
            message: serde_json::json!({"text": "hi"}),
            custom_data: None,
        };
        let delivery = frame.into_client_delivery().unwrap();
        let encoded = serde_json::to_value(&delivery).unwrap();
        assert!(encoded.get("application_user_identifiers").is_none());
        assert_eq!(encoded["type"], "ROUTABLE");
    }

    #[test]
    fn server_mode_serializes_to_the_literal_wire_value() {
        let frame = RouterFrame::ServerMode {
            message: ServerModeValue::Operational,
        };
        let encoded = serde_json::to_value(&frame).unwrap();
        assert_eq!(encoded["message"], "OPERATIONAL");
    }
}
