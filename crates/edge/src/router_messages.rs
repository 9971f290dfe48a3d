//! `RouterMessageService` (`§4.7`): dispatches frames arriving from a CR to
//! local client devices, the `OfflineQueue`, or the router's own
//! operational flag.

use std::sync::Arc;

use tracing::debug;

use chat_fabric_protocol::RouterFrame;

use crate::directory::UserDirectory;
use crate::offline_queue::{OfflineQueue, QueuedNotification};
use crate::router_pool::RouterHandle;

pub struct RouterMessageService {
    directory: Arc<UserDirectory>,
    offline_queue: Arc<OfflineQueue>,
}

impl RouterMessageService {
    pub fn new(directory: Arc<UserDirectory>, offline_queue: Arc<OfflineQueue>) -> Self {
        Self {
            directory,
            offline_queue,
        }
    }

    pub fn handle_frame(&self, router: &RouterHandle, frame: RouterFrame) {
        match frame {
            RouterFrame::ServerMode { .. } => router.mark_operational(),

            RouterFrame::OfflineNotification {
                application_user_identifiers,
                chat_room_identifier,
                application_user_identifier,
                message,
            } => self.enqueue_offline(
                application_user_identifiers,
                chat_room_identifier,
                application_user_identifier,
                message,
            ),

            RouterFrame::Routable { .. } | RouterFrame::SystemRoutable { .. } | RouterFrame::SetLastMessageRead { .. } => {
                self.deliver_locally(frame);
            },

            RouterFrame::AddAppUserWebsocket { .. }
            | RouterFrame::RemoveAppUserWebsocket { .. }
            | RouterFrame::FullSync { .. } => {
                debug!("edge: received a CR-bound-only frame type from a router, ignoring");
            },
        }
    }

    fn deliver_locally(&self, frame: RouterFrame) {
        let Some(recipients) = frame.recipients().map(<[String]>::to_vec) else {
            return;
        };
        let Some(delivery) = frame.into_client_delivery() else {
            return;
        };
        for app_user_identifier in &recipients {
            for device in self.directory.devices_for(app_user_identifier) {
                if !device.send_delivery(&delivery) {
                    debug!(app_user_identifier = %app_user_identifier, "edge: best-effort local delivery failed, continuing");
                }
            }
        }
    }

    /// `§4.7`: the sender's own id is always excluded, even if present in
    /// `application_user_identifiers`.
    fn enqueue_offline(
        &self,
        application_user_identifiers: Vec<String>,
        chat_room_identifier: String,
        application_user_identifier: String,
        message: serde_json::Value,
    ) {
        for recipient in application_user_identifiers {
            if recipient == application_user_identifier {
                continue;
            }
            self.offline_queue.enqueue(
                recipient,
                QueuedNotification {
                    chat_room_identifier: chat_room_identifier.clone(),
                    sender_application_user_identifier: application_user_identifier.clone(),
                    message: message.clone(),
                },
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::ClientHandle;

    fn router() -> RouterHandle {
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        RouterHandle::new("r1", tx)
    }

    #[test]
    fn server_mode_marks_the_originating_router_operational() {
        let service = RouterMessageService::new(Arc::new(UserDirectory::new()), Arc::new(OfflineQueue::new()));
        let r = router();
        assert!(!r.is_operational());
        service.handle_frame(&r, RouterFrame::ServerMode {
            message: chat_fabric_protocol::ServerModeValue::Operational,
        });
        assert!(r.is_operational());
    }

    #[test]
    fn offline_notification_excludes_the_sender_even_if_listed() {
        let offline_queue = Arc::new(OfflineQueue::new());
        let service = RouterMessageService::new(Arc::new(UserDirectory::new()), offline_queue.clone());
        service.handle_frame(&router(), RouterFrame::OfflineNotification {
            application_user_identifiers: vec!["u1".into(), "u2".into()],
            chat_room_identifier: "r1".into(),
            application_user_identifier: "u1".into(),
            message: serde_json::json!({"text": "hi"}),
        });
        let snapshot = offline_queue.snapshot_and_clear();
        assert!(!snapshot.contains_key("u1"));
        assert!(snapshot.contains_key("u2"));
    }

    #[test]
    fn routable_delivers_to_every_local_device_of_every_recipient() {
        let directory = Arc::new(UserDirectory::new());
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        directory.add(ClientHandle::new("u2", "d1", "app-1", tx));
        let service = RouterMessageService::new(directory, Arc::new(OfflineQueue::new()));
        service.handle_frame(&router(), RouterFrame::Routable {
            chat_room_identifier: "r1".into(),
            app_user_identifier: "u1".into(),
            application_user_identifiers: vec!["u1".into(), "u2".into()],
            message_timestamp_identifier: 1,
            message: serde_json::json!({"text": "hi"}),
            custom_data: None,
        });
        assert!(rx.try_recv().is_ok());
    }
}
