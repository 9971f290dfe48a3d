//! `RouterPool` (`§4.4`): maintains one outbound websocket per known CR,
//! discovers CRs periodically, and exposes `send_to_all` / round-robin
//! send over the operational subset.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use http::HeaderValue;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message, tungstenite::client::IntoClientRequest};
use tracing::{info, warn};

use chat_fabric_admin_client::{AdminClient, CentralRouterInstance};
use chat_fabric_protocol::RouterFrame;

use crate::directory::UserDirectory;
use crate::router_messages::RouterMessageService;

/// Discovery cadence (`§4.4`, `§5`).
pub const DISCOVERY_INTERVAL: Duration = Duration::from_secs(120);

const SECRET_HEADER: &str = "x-router-internal-secret";
const IDENTIFIER_HEADER: &str = "x-websocket-server-identifier";

/// A live outbound connection to one CR.
pub struct RouterHandle {
    pub router_id: String,
    operational: AtomicBool,
    sender: UnboundedSender<Message>,
}

impl RouterHandle {
    pub fn new(router_id: impl Into<String>, sender: UnboundedSender<Message>) -> Self {
        Self {
            router_id: router_id.into(),
            operational: AtomicBool::new(false),
            sender,
        }
    }

    pub fn is_operational(&self) -> bool {
        self.operational.load(Ordering::Acquire)
    }

    pub fn mark_operational(&self) {
        self.operational.store(true, Ordering::Release);
        info!(router_id = %self.router_id, "edge: router transitioned to operational");
    }

    /// Best-effort send (`§4.3`'s per-socket policy applies symmetrically
    /// on this side).
    pub fn send_frame(&self, frame: &RouterFrame) -> bool {
        let Ok(text) = serde_json::to_string(frame) else {
            return false;
        };
        self.sender.send(Message::Text(text.into())).is_ok()
    }
}

/// `edge_id → {connection, inbound task}` plus the round-robin counter over
/// the operational subset.
#[derive(Default)]
pub struct RouterPool {
    connections: DashMap<String, Arc<RouterHandle>>,
    tasks: DashMap<String, JoinHandle<()>>,
    counter: AtomicUsize,
}

/// Raised when the operational pool is empty (`§4.4`, `§7` code 10006).
pub struct NoOperationalRouterError;

impl RouterPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// `§4.5` step 7 / `§4.3`: broadcast a directory-maintenance frame to
    /// every known router regardless of operational status.
    pub fn send_to_all(&self, frame: &RouterFrame) {
        for entry in self.connections.iter() {
            if !entry.value().send_frame(frame) {
                warn!(router_id = %entry.key(), "edge: failed to broadcast directory frame, router likely gone");
            }
        }
    }

    /// `§4.4` round-robin: a monotonically incremented counter modulo the
    /// operational pool size.
    pub fn round_robin_send(&self, frame: &RouterFrame) -> Result<(), NoOperationalRouterError> {
        let operational: Vec<Arc<RouterHandle>> = self
            .connections
            .iter()
            .filter(|e| e.value().is_operational())
            .map(|e| e.value().clone())
            .collect();
        if operational.is_empty() {
            return Err(NoOperationalRouterError);
        }
        let idx = self.counter.fetch_add(1, Ordering::Relaxed) % operational.len();
        operational[idx].send_frame(frame);
        Ok(())
    }

    pub fn operational_count(&self) -> usize {
        self.connections.iter().filter(|e| e.value().is_operational()).count()
    }

    pub fn known_router_ids(&self) -> Vec<String> {
        self.connections.iter().map(|e| e.key().clone()).collect()
    }

    fn is_connecting(&self, router_id: &str) -> bool {
        self.tasks.get(router_id).is_some_and(|t| !t.is_finished())
    }

    fn disconnect(&self, router_id: &str) {
        self.connections.remove(router_id);
        if let Some((_, task)) = self.tasks.remove(router_id) {
            task.abort();
        }
    }

    /// `§4.4` discovery loop: poll the admin API, diff against the
    /// currently-held set, connect to new ids, close vanished ones. Runs
    /// until the task is aborted.
    pub async fn run_discovery_loop(
        self: Arc<Self>,
        admin: AdminClient,
        identifier: String,
        router_secret: String,
        directory: Arc<UserDirectory>,
        dispatcher: Arc<RouterMessageService>,
    ) {
        loop {
            let routers = admin.list_central_routers().await;
            self.clone().reconcile(&routers, &identifier, &router_secret, &directory, &dispatcher);
            tokio::time::sleep(DISCOVERY_INTERVAL).await;
        }
    }

    fn reconcile(
        self: Arc<Self>,
        routers: &[CentralRouterInstance],
        identifier: &str,
        router_secret: &str,
        directory: &Arc<UserDirectory>,
        dispatcher: &Arc<RouterMessageService>,
    ) {
        let discovered: std::collections::HashSet<&str> = routers.iter().map(|r| r.identifier.as_str()).collect();

        for known_id in self.known_router_ids() {
            if !discovered.contains(known_id.as_str()) {
                info!(router_id = %known_id, "edge: router vanished from discovery, closing");
                self.disconnect(&known_id);
            }
        }

        for router in routers {
            if self.connections.contains_key(&router.identifier) || self.is_connecting(&router.identifier) {
                continue;
            }
            let pool = self.clone();
            let router = router.clone();
            let identifier = identifier.to_string();
            let router_secret = router_secret.to_string();
            let directory = directory.clone();
            let dispatcher = dispatcher.clone();
            let handle = tokio::spawn(async move {
                pool.connect_and_run(router, identifier, router_secret, directory, dispatcher).await;
            });
            self.tasks.insert(router.identifier.clone(), handle);
        }
    }

    async fn connect_and_run(
        self: Arc<Self>,
        router: CentralRouterInstance,
        identifier: String,
        router_secret: String,
        directory: Arc<UserDirectory>,
        dispatcher: Arc<RouterMessageService>,
    ) {
        let url = format!("ws://{}/", router.public_ip);
        let mut request = match url.into_client_request() {
            Ok(r) => r,
            Err(err) => {
                warn!(router_id = %router.identifier, error = %err, "edge: failed to build router connect request");
                return;
            },
        };
        let headers = request.headers_mut();
        if let Ok(v) = HeaderValue::from_str(&router_secret) {
            headers.insert(SECRET_HEADER, v);
        }
        if let Ok(v) = HeaderValue::from_str(&identifier) {
            headers.insert(IDENTIFIER_HEADER, v);
        }

        let stream = match connect_async(request).await {
            Ok((stream, _response)) => stream,
            Err(err) => {
                warn!(router_id = %router.identifier, error = %err, "edge: router connect failed, will retry next discovery tick");
                return;
            },
        };

        info!(router_id = %router.identifier, "edge: connected to router");
        let (mut ws_tx, mut ws_rx) = stream.split();
        let (outbound_tx, mut outbound_rx) = tokio::sync::mpsc::unbounded_channel::<Message>();

        let write_task = tokio::spawn(async move {
            while let Some(msg) = outbound_rx.recv().await {
                if ws_tx.send(msg).await.is_err() {
                    break;
                }
            }
        });

        let handle = Arc::new(RouterHandle::new(router.identifier.clone(), outbound_tx));
        self.connections.insert(router.identifier.clone(), handle.clone());

        let full_sync = RouterFrame::FullSync {
            application_user_identifiers: directory.known_app_user_ids(),
        };
        handle.send_frame(&full_sync);

        while let Some(msg) = ws_rx.next().await {
            let text = match msg {
                Ok(Message::Text(t)) => t.to_string(),
                Ok(Message::Close(_)) => break,
                Ok(_) => continue,
                Err(err) => {
                    warn!(router_id = %router.identifier, error = %err, "edge: router transport error, closing");
                    break;
                },
            };
            let frame: RouterFrame = match serde_json::from_str(&text) {
                Ok(f) => f,
                Err(err) => {
                    warn!(router_id = %router.identifier, error = %err, "edge: malformed router frame, ignoring");
                    continue;
                },
            };
            dispatcher.handle_frame(&handle, frame);
        }

        info!(router_id = %router.identifier, "edge: router disconnected");
        self.connections.remove(&router.identifier);
        write_task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(router_id: &str, operational: bool) -> (Arc<RouterHandle>, tokio::sync::mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let handle = Arc::new(RouterHandle::new(router_id, tx));
        if operational {
            handle.mark_operational();
        }
        (handle, rx)
    }

    #[test]
    fn round_robin_visits_every_operational_router_within_n_sends() {
        let pool = RouterPool::new();
        for i in 0..3 {
            let (h, _rx) = handle(&format!("r{i}"), true);
            pool.connections.insert(h.router_id.clone(), h);
        }
        let frame = RouterFrame::FullSync {
            application_user_identifiers: vec![],
        };
        let mut visited = std::collections::HashSet::new();
        for _ in 0..3 {
            let idx = pool.counter.load(Ordering::Relaxed) % 3;
            visited.insert(idx);
            pool.round_robin_send(&frame).unwrap();
        }
        assert_eq!(visited.len(), 3);
    }

    #[test]
    fn round_robin_rejects_when_the_operational_pool_is_empty() {
        let pool = RouterPool::new();
        let (h, _rx) = handle("r1", false);
        pool.connections.insert(h.router_id.clone(), h);
        let frame = RouterFrame::FullSync {
            application_user_identifiers: vec![],
        };
        assert!(pool.round_robin_send(&frame).is_err());
    }

    #[test]
    fn send_to_all_reaches_non_operational_connections_too() {
        let pool = RouterPool::new();
        let (h1, mut rx1) = handle("r1", false);
        pool.connections.insert(h1.router_id.clone(), h1);
        let frame = RouterFrame::FullSync {
            application_user_identifiers: vec!["u1".into()],
        };
        pool.send_to_all(&frame);
        assert!(rx1.try_recv().is_ok());
    }
}
