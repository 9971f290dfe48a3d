//! The central router (CR): a stateless-per-connection broker multiplexing
//! routable messages between edge servers (`§1`, `§2`).

pub mod dispatcher;
pub mod gateway;
pub mod locator;
pub mod mode;
pub mod registry;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::routing::any;
use tracing::info;

use chat_fabric_admin_client::AdminClient;
use chat_fabric_alert::AlertChannel;

pub use dispatcher::RouterDispatcher;
pub use locator::UserLocator;
pub use mode::{ModeController, ServerMode};
pub use registry::{EdgeHandle, EdgeRegistry};

/// Shared, constructed-once collaborator handles (`§9`: "pass a
/// constructed-once immutable record of shared collaborator handles", no
/// mutable global context object).
pub struct AppState {
    pub registry: Arc<EdgeRegistry>,
    pub locator: Arc<UserLocator>,
    pub mode: Arc<ModeController>,
    pub dispatcher: RouterDispatcher,
    pub router_secret: String,
    pub alert: Arc<dyn AlertChannel>,
}

/// Fetch `expected_edge_count` from the admin API at startup (`§4.1`): the
/// sum of `instances` across known edge servers. A startup-time
/// control-surface failure is fatal (`§6.8`) — the caller is expected to
/// abort the process if `admin.list_chat_servers()` degraded to empty
/// unexpectedly; this function itself just sums whatever came back.
pub async fn fetch_expected_edge_count(admin: &AdminClient) -> usize {
    admin
        .list_chat_servers()
        .await
        .iter()
        .map(|s| s.instances as usize)
        .sum()
}

/// Build the CR's axum application: a single upgrade route that accepts
/// every edge connection (`§4.2`, `§6.3`).
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", any(gateway::upgrade_handler))
        .with_state(state)
}

/// Run the central router until the listener is closed.
pub async fn serve(bind_addr: SocketAddr, state: Arc<AppState>) -> std::io::Result<()> {
    let mode = state.mode.clone();
    let registry = state.registry.clone();
    tokio::spawn(async move {
        mode.run_barrier(&registry).await;
    });

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    info!(%bind_addr, "router: listening for edge connections");
    axum::serve(listener, app).await
}
