//! `EdgeRegistry` (`§4.2`): `edge_id → socket` at the CR, owning each
//! `EdgeConnection`. Other CR components (the `UserLocator`) hold only the
//! `edge_id` and look the handle up here — a weak reference in spirit
//! (`§3`'s ownership model) without reaching for `Weak<T>` machinery, since
//! the registry is the single source of truth for "is this edge still
//! connected".

use axum::extract::ws::Message;
use dashmap::DashMap;
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

use chat_fabric_protocol::{RouterFrame, ServerModeValue};

/// A live connection to one edge server.
#[derive(Clone)]
pub struct EdgeHandle {
    pub edge_id: String,
    pub is_system_channel: bool,
    sender: UnboundedSender<Message>,
}

impl EdgeHandle {
    /// Best-effort send (`§4.3`: "a send failure on one edge must not abort
    /// delivery to others"). Returns whether the frame was handed to the
    /// socket's write loop.
    pub fn send_frame(&self, frame: &RouterFrame) -> bool {
        let Ok(text) = serde_json::to_string(frame) else {
            return false;
        };
        self.sender.send(Message::Text(text.into())).is_ok()
    }

    pub fn send_server_mode_operational(&self) {
        let frame = RouterFrame::ServerMode {
            message: ServerModeValue::Operational,
        };
        if !self.send_frame(&frame) {
            debug!(edge_id = %self.edge_id, "router: failed to advertise SERVER_MODE, edge likely gone");
        }
    }
}

/// The CR's `edge_id → EdgeHandle` map.
#[derive(Default)]
pub struct EdgeRegistry {
    edges: DashMap<String, EdgeHandle>,
}

impl EdgeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &self,
        edge_id: String,
        sender: UnboundedSender<Message>,
        is_system_channel: bool,
    ) -> EdgeHandle {
        let handle = EdgeHandle {
            edge_id: edge_id.clone(),
            is_system_channel,
            sender,
        };
        self.edges.insert(edge_id, handle.clone());
        handle
    }

    pub fn remove(&self, edge_id: &str) -> Option<EdgeHandle> {
        self.edges.remove(edge_id).map(|(_, handle)| handle)
    }

    pub fn get(&self, edge_id: &str) -> Option<EdgeHandle> {
        self.edges.get(edge_id).map(|e| e.clone())
    }

    /// Snapshot of every currently registered edge (`§4.1`: advertise mode
    /// to every registered edge when the barrier fires).
    pub fn iter(&self) -> Vec<EdgeHandle> {
        self.edges.iter().map(|e| e.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}
