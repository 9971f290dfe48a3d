//! `OfflineQueue` (`§3`, `§4.7`, `§4.8`, `§9`): a `app_user_id → newest
//! notification` map that coalesces bursts between push-gateway flushes.
//! Newest-wins is intentional (avoid a notification storm) and deliberately
//! loses per-message fidelity — preserve this, don't "fix" it into a list.

use std::collections::HashMap;
use std::sync::Mutex;

use serde_json::Value;

/// One pending offline notification, prior to the push-gateway-facing
/// `click_action` annotation added at flush time (`§3.1`).
#[derive(Debug, Clone)]
pub struct QueuedNotification {
    pub chat_room_identifier: String,
    pub sender_application_user_identifier: String,
    pub message: Value,
}

/// `§5`: the snapshot-and-clear at flush time must be atomic with respect to
/// concurrent producers — a single `Mutex` around the whole map gives that
/// directly, where a `DashMap` would only give per-shard atomicity.
#[derive(Default)]
pub struct OfflineQueue {
    pending: Mutex<HashMap<String, QueuedNotification>>,
}

impl OfflineQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Newest-wins enqueue for one recipient (`§4.7`).
    pub fn enqueue(&self, app_user_identifier: String, notification: QueuedNotification) {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(app_user_identifier, notification);
    }

    /// Atomically take every queued entry, leaving the queue empty
    /// (`§4.8` flush cadence).
    pub fn snapshot_and_clear(&self) -> HashMap<String, QueuedNotification> {
        std::mem::take(&mut *self.pending.lock().unwrap_or_else(|e| e.into_inner()))
    }

    pub fn len(&self) -> usize {
        self.pending.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note(text: &str) -> QueuedNotification {
        QueuedNotification {
            chat_room_identifier: "r1".into(),
            sender_application_user_identifier: "sender".into(),
            message: serde_json::json!({"text": text}),
        }
    }

    #[test]
    fn a_second_enqueue_for_the_same_user_overwrites_the_first() {
        let queue = OfflineQueue::new();
        queue.enqueue("u1".into(), note("first"));
        queue.enqueue("u1".into(), note("second"));
        assert_eq!(queue.len(), 1);
        let snapshot = queue.snapshot_and_clear();
        assert_eq!(snapshot["u1"].message["text"], "second");
    }

    #[test]
    fn snapshot_and_clear_empties_the_queue() {
        let queue = OfflineQueue::new();
        queue.enqueue("u1".into(), note("hi"));
        let snapshot = queue.snapshot_and_clear();
        assert_eq!(snapshot.len(), 1);
        assert!(queue.is_empty());
        assert!(queue.snapshot_and_clear().is_empty());
    }
}
