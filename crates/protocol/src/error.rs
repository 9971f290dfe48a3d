use serde::{Deserialize, Serialize};

/// Numeric wire error codes. Part of the wire contract — do not renumber.
pub mod error_codes {
    pub const CHAT_SERVER_EXCEPTION: u32 = 10000;
    pub const USER_NOT_IN_CHAT_ROOM: u32 = 10001;
    pub const WRONG_MESSAGE_TYPE: u32 = 10002;
    pub const CHAT_ROOM_IDENTIFIERS_LIST_LENGTH: u32 = 10003;
    pub const INVALID_MESSAGE_FORMAT: u32 = 10004;
    pub const MISSING_REQUIRED_FIELD: u32 = 10005;
    pub const DNS_CONNECTIONS_EXCEPTION: u32 = 10006;
    pub const MESSAGE_SPAM_EXCEPTION: u32 = 10007;
    pub const INVALID_CHAT_ROOM_MESSAGE_TYPE: u32 = 10008;
    pub const CHAT_ROOM_DOES_NOT_EXIST: u32 = 10009;
}

/// The body of an `ERROR` frame sent from the edge server to a client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorShape {
    pub message: String,
    pub error_code: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra: Option<serde_json::Value>,
}

impl ErrorShape {
    pub fn new(error_code: u32, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            error_code,
            extra: None,
        }
    }

    pub fn with_extra(mut self, extra: serde_json::Value) -> Self {
        self.extra = Some(extra);
        self
    }
}
