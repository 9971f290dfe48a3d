//! `RouterDispatcher` (`§4.3`): routes `ROUTABLE` / `SYSTEM_ROUTABLE` /
//! `SET_LAST_MESSAGE_READ` to the union of edges owning the recipients, and
//! maintains the `UserLocator` from `ADD`/`REMOVE`/`FULL_SYNC` frames.

use tracing::{debug, warn};

use chat_fabric_protocol::RouterFrame;

use crate::{locator::UserLocator, mode::ModeController, registry::EdgeRegistry};

pub struct RouterDispatcher {
    registry: std::sync::Arc<EdgeRegistry>,
    locator: std::sync::Arc<UserLocator>,
    mode: std::sync::Arc<ModeController>,
}

impl RouterDispatcher {
    pub fn new(
        registry: std::sync::Arc<EdgeRegistry>,
        locator: std::sync::Arc<UserLocator>,
        mode: std::sync::Arc<ModeController>,
    ) -> Self {
        Self {
            registry,
            locator,
            mode,
        }
    }

    /// Handle one inbound frame from `sender_edge_id` (`§4.3`). Best-effort
    /// per-socket delivery: a send failure on one edge never aborts
    /// delivery to the rest (`§4.3`, `§5`).
    pub async fn handle_frame(&self, sender_edge_id: &str, frame: RouterFrame) {
        match frame {
            RouterFrame::AddAppUserWebsocket {
                application_user_identifier,
            } => {
                self.locator.add(&application_user_identifier, sender_edge_id);
            },

            RouterFrame::RemoveAppUserWebsocket {
                application_user_identifier,
            } => {
                self.locator.remove(&application_user_identifier, sender_edge_id);
            },

            RouterFrame::FullSync {
                application_user_identifiers,
            } => {
                for id in &application_user_identifiers {
                    self.locator.add(id, sender_edge_id);
                }
                // `§4.1`: FULL_SYNC also triggers advertise_mode for the
                // joining edge (a no-op unless already OPERATIONAL).
                if let Some(edge) = self.registry.get(sender_edge_id) {
                    self.mode.advertise_mode(&edge).await;
                }
            },

            RouterFrame::Routable { .. } | RouterFrame::SystemRoutable { .. } | RouterFrame::SetLastMessageRead { .. } => {
                self.dispatch_routable(sender_edge_id, frame);
            },

            RouterFrame::OfflineNotification { .. } | RouterFrame::ServerMode { .. } => {
                warn!(sender_edge_id = %sender_edge_id, "router: received an ES-bound-only frame type from an edge, ignoring");
            },
        }
    }

    fn dispatch_routable(&self, sender_edge_id: &str, frame: RouterFrame) {
        let recipients = frame.recipients().unwrap_or_default().to_vec();
        let (owners, offline) = self.locator.owners_for(&recipients);

        for edge_id in &owners {
            if let Some(edge) = self.registry.get(edge_id) {
                if !edge.send_frame(&frame) {
                    debug!(edge_id = %edge_id, "router: best-effort delivery failed, continuing");
                }
            }
        }

        if frame.produces_offline_notification() && !offline.is_empty() {
            if let RouterFrame::Routable {
                chat_room_identifier,
                app_user_identifier,
                message,
                ..
            } = &frame
            {
                let notification = RouterFrame::OfflineNotification {
                    application_user_identifiers: offline,
                    chat_room_identifier: chat_room_identifier.clone(),
                    application_user_identifier: app_user_identifier.clone(),
                    message: message.clone(),
                };
                if let Some(sender_edge) = self.registry.get(sender_edge_id) {
                    sender_edge.send_frame(&notification);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn wire_up() -> (
        RouterDispatcher,
        Arc<EdgeRegistry>,
        tokio::sync::mpsc::UnboundedReceiver<axum::extract::ws::Message>,
        tokio::sync::mpsc::UnboundedReceiver<axum::extract::ws::Message>,
    ) {
        let registry = Arc::new(EdgeRegistry::new());
        let locator = Arc::new(UserLocator::new());
        let mode = Arc::new(ModeController::new(0));
        let (tx1, rx1) = tokio::sync::mpsc::unbounded_channel();
        let (tx2, rx2) = tokio::sync::mpsc::unbounded_channel();
        registry.register("e1".into(), tx1, false);
        registry.register("e2".into(), tx2, false);
        let dispatcher = RouterDispatcher::new(registry.clone(), locator, mode);
        (dispatcher, registry, rx1, rx2)
    }

    #[tokio::test]
    async fn cross_edge_routable_fans_out_to_every_owning_edge_once() {
        let (dispatcher, _registry, mut rx1, mut rx2) = wire_up();
        dispatcher
            .handle_frame(
                "e1",
                RouterFrame::AddAppUserWebsocket {
                    application_user_identifier: "u1".into(),
                },
            )
            .await;
        dispatcher
            .handle_frame(
                "e2",
                RouterFrame::AddAppUserWebsocket {
                    application_user_identifier: "u2".into(),
                },
            )
            .await;

        dispatcher
            .handle_frame(
                "e1",
                RouterFrame::Routable {
                    chat_room_identifier: "r1".into(),
                    app_user_identifier: "u1".into(),
                    application_user_identifiers: vec!["u1".into(), "u2".into()],
                    message_timestamp_identifier: 1,
                    message: serde_json::json!({"text": "hi"}),
                    custom_data: None,
                },
            )
            .await;

        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_ok());
    }

    #[tokio::test]
    async fn offline_recipients_produce_exactly_one_notification_back_to_sender() {
        let (dispatcher, _registry, mut rx1, mut rx2) = wire_up();
        dispatcher
            .handle_frame(
                "e1",
                RouterFrame::Routable {
                    chat_room_identifier: "r1".into(),
                    app_user_identifier: "u1".into(),
                    application_user_identifiers: vec!["u3".into()],
                    message_timestamp_identifier: 1,
                    message: serde_json::json!({"text": "hi"}),
                    custom_data: None,
                },
            )
            .await;

        let msg = rx1.try_recv().expect("sender should get an offline notification");
        let text = match msg {
            axum::extract::ws::Message::Text(t) => t.to_string(),
            _ => panic!("expected text frame"),
        };
        assert!(text.contains("OFFLINE_NOTIFICATION"));
        assert!(rx2.try_recv().is_err());
    }

    #[tokio::test]
    async fn system_routable_to_unknown_recipients_produces_no_offline_notification() {
        let (dispatcher, _registry, mut rx1, _rx2) = wire_up();
        dispatcher
            .handle_frame(
                "e1",
                RouterFrame::SystemRoutable {
                    chat_room_identifier: "r1".into(),
                    application_user_identifiers: vec!["u3".into()],
                    message_timestamp_identifier: 1,
                    message: serde_json::json!({"text": "hi"}),
                },
            )
            .await;
        assert!(rx1.try_recv().is_err());
    }
}
