//! `UserDirectory` (`§3`, `§4.5`): `app_user_id → {device_id → socket}` at
//! the edge server, plus the `ActiveUserCount`-style capacity accounting
//! that shares its accept/close critical section.
//!
//! Mirrors the CR's `UserLocator` empty-set-deletion discipline
//! (`crate::locator` equivalent on the router side): every mutation that can
//! empty the inner map is a single atomic dashmap `Entry` operation.

use std::collections::HashMap;

use axum::extract::ws::Message;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::mpsc::UnboundedSender;

use chat_fabric_protocol::ClientDelivery;

/// A live client websocket attached to this edge server.
#[derive(Clone)]
pub struct ClientHandle {
    pub app_user_id: String,
    pub device_id: String,
    pub application_id: String,
    sender: UnboundedSender<Message>,
}

impl ClientHandle {
    pub fn new(
        app_user_id: impl Into<String>,
        device_id: impl Into<String>,
        application_id: impl Into<String>,
        sender: UnboundedSender<Message>,
    ) -> Self {
        Self {
            app_user_id: app_user_id.into(),
            device_id: device_id.into(),
            application_id: application_id.into(),
            sender,
        }
    }

    pub fn send_text(&self, text: String) -> bool {
        self.sender.send(Message::Text(text.into())).is_ok()
    }

    pub fn send_delivery(&self, delivery: &ClientDelivery) -> bool {
        let Ok(text) = serde_json::to_string(delivery) else {
            return false;
        };
        self.send_text(text)
    }
}

/// The ES's `app_user_id → device_id → ClientHandle` directory.
#[derive(Default)]
pub struct UserDirectory {
    users: DashMap<String, HashMap<String, ClientHandle>>,
}

impl UserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// `§4.5` step 7: attach one device. Returns `true` if `app_user_id` was
    /// previously absent — the caller must then broadcast
    /// `ADD_APP_USER_WEBSOCKET` to every router.
    pub fn add(&self, handle: ClientHandle) -> bool {
        match self.users.entry(handle.app_user_id.clone()) {
            Entry::Occupied(mut entry) => {
                entry.get_mut().insert(handle.device_id.clone(), handle);
                false
            },
            Entry::Vacant(entry) => {
                let mut devices = HashMap::new();
                devices.insert(handle.device_id.clone(), handle);
                entry.insert(devices);
                true
            },
        }
    }

    /// `§4.5` close path: detach one device. Returns `true` if this was the
    /// last device for `app_user_id` — the caller must then broadcast
    /// `REMOVE_APP_USER_WEBSOCKET` and drop the outer key, which this call
    /// already does atomically.
    pub fn remove(&self, app_user_id: &str, device_id: &str) -> bool {
        if let Entry::Occupied(mut entry) = self.users.entry(app_user_id.to_string()) {
            entry.get_mut().remove(device_id);
            if entry.get().is_empty() {
                entry.remove();
                return true;
            }
        }
        false
    }

    /// Every device handle currently attached for `app_user_id` (`§4.7`
    /// local delivery fan-out).
    pub fn devices_for(&self, app_user_id: &str) -> Vec<ClientHandle> {
        self.users
            .get(app_user_id)
            .map(|devices| devices.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn contains(&self, app_user_id: &str) -> bool {
        self.users.get(app_user_id).is_some_and(|d| !d.is_empty())
    }

    /// Snapshot of every currently-known `app_user_id` key, for the
    /// `FULL_SYNC` frame sent on router (re)connect (`§4.4`).
    pub fn known_app_user_ids(&self) -> Vec<String> {
        self.users.iter().map(|e| e.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(app_user_id: &str, device_id: &str) -> ClientHandle {
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        ClientHandle::new(app_user_id, device_id, "app-1", tx)
    }

    #[test]
    fn first_device_add_reports_previously_absent() {
        let directory = UserDirectory::new();
        assert!(directory.add(handle("u1", "d1")));
        assert!(!directory.add(handle("u1", "d2")));
        assert_eq!(directory.devices_for("u1").len(), 2);
    }

    #[test]
    fn removing_the_last_device_drops_the_key_and_reports_it() {
        let directory = UserDirectory::new();
        directory.add(handle("u1", "d1"));
        let was_last = directory.remove("u1", "d1");
        assert!(was_last);
        assert!(!directory.contains("u1"));
    }

    #[test]
    fn removing_one_of_several_devices_is_not_reported_as_last() {
        let directory = UserDirectory::new();
        directory.add(handle("u1", "d1"));
        directory.add(handle("u1", "d2"));
        assert!(!directory.remove("u1", "d1"));
        assert!(directory.contains("u1"));
    }

    #[test]
    fn known_app_user_ids_reflects_current_keys() {
        let directory = UserDirectory::new();
        directory.add(handle("u1", "d1"));
        directory.add(handle("u2", "d1"));
        let mut ids = directory.known_app_user_ids();
        ids.sort();
        assert_eq!(ids, vec!["u1".to_string(), "u2".to_string()]);
    }
}
