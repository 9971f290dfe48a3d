//! The manager protocol (`§3.1`, `§4.5` step 6): frames sent only to
//! connections authenticated via `X-MANAGER-SECRET` rather than a session
//! token. Manager connections are excluded from the `UserDirectory` and
//! never receive ordinary client traffic.

use std::collections::HashMap;

use serde::Serialize;

use crate::ApplicationId;

/// Reports current per-application connected-user counts to manager
/// connections.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ManagerFrame {
    #[serde(rename = "CONNECTED_USERS_INFO")]
    ConnectedUsersInfo {
        connected_users: HashMap<ApplicationId, u32>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connected_users_info_serializes_with_type_tag() {
        let mut connected_users = HashMap::new();
        connected_users.insert("app-1".to_string(), 3);
        let frame = ManagerFrame::ConnectedUsersInfo { connected_users };
        let encoded = serde_json::to_value(&frame).unwrap();
        assert_eq!(encoded["type"], "CONNECTED_USERS_INFO");
        assert_eq!(encoded["connected_users"]["app-1"], 3);
    }
}
