//! The edge server (ES): terminates client websockets, persists chat
//! traffic, and maintains the per-process `RouterPool` that fans messages
//! out to central routers (`§1`, `§2`).

pub mod anti_spam;
pub mod directory;
pub mod error;
pub mod gateway;
pub mod inbound;
pub mod membership;
pub mod offline_queue;
pub mod performance;
pub mod peripherals;
pub mod router_messages;
pub mod router_pool;
pub mod settings;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tracing::info;

use chat_fabric_admin_client::AdminClient;
use chat_fabric_alert::AlertChannel;
use chat_fabric_common::ids::IdAllocator;
use chat_fabric_push::{DeviceTokenDirectory, PushGateway};
use chat_fabric_store::{ChatMessageStore, ChatRoomStore, CustomDataStore, LastMessageReadStore, SessionStore};

pub use directory::UserDirectory;
pub use inbound::InboundMessageService;
pub use offline_queue::OfflineQueue;
pub use performance::PerformanceCounters;
pub use router_messages::RouterMessageService;
pub use router_pool::RouterPool;
pub use settings::ApplicationSettingsCache;

/// Shared, constructed-once collaborator handles, mirroring the router
/// crate's `AppState` (`§9`: one immutable record of collaborator handles,
/// no mutable global context object).
pub struct AppState {
    pub directory: Arc<UserDirectory>,
    pub router_pool: Arc<RouterPool>,
    pub settings: Arc<ApplicationSettingsCache>,
    pub session_store: Arc<dyn SessionStore>,
    pub manager_secret: String,
    pub inbound: InboundMessageService,
    pub alert: Arc<dyn AlertChannel>,
}

/// Everything `serve` needs to wire together an edge server: the
/// collaborator handles plus the peripheral-loop configuration that
/// doesn't belong on a per-request path (`AppState` only carries what the
/// websocket upgrade handler and inbound dispatch actually touch).
#[allow(clippy::too_many_arguments)]
pub struct EdgeDeps {
    pub admin: AdminClient,
    pub identifier: String,
    pub router_secret: String,
    pub manager_secret: String,
    pub session_store: Arc<dyn SessionStore>,
    pub chat_rooms: Arc<dyn ChatRoomStore>,
    pub chat_messages: Arc<dyn ChatMessageStore>,
    pub last_message_read: Arc<dyn LastMessageReadStore>,
    pub custom_data: Arc<dyn CustomDataStore>,
    pub push_gateway: Arc<dyn PushGateway>,
    pub device_tokens: Arc<dyn DeviceTokenDirectory>,
    pub alert: Arc<dyn AlertChannel>,
    pub max_history_limit: u32,
    pub offline_flush_interval: std::time::Duration,
}

/// Build the full `AppState` plus the set of background tasks `serve`
/// spawns alongside the listener. Split out from `serve` so a test can
/// construct an `AppState` without starting any loop.
pub fn build_state(deps: EdgeDeps) -> (Arc<AppState>, Vec<BackgroundTask>) {
    let directory = Arc::new(UserDirectory::new());
    let router_pool = Arc::new(RouterPool::new());
    let settings = Arc::new(ApplicationSettingsCache::new());
    let offline_queue = Arc::new(OfflineQueue::new());
    let performance = Arc::new(PerformanceCounters::new());
    let id_allocator = Arc::new(IdAllocator::new());
    let router_messages = Arc::new(RouterMessageService::new(directory.clone(), offline_queue.clone()));

    let inbound = InboundMessageService::new(
        deps.chat_rooms,
        deps.chat_messages,
        deps.last_message_read,
        deps.custom_data,
        router_pool.clone(),
        id_allocator,
        performance.clone(),
        deps.max_history_limit,
    );

    let state = Arc::new(AppState {
        directory: directory.clone(),
        router_pool: router_pool.clone(),
        settings: settings.clone(),
        session_store: deps.session_store,
        manager_secret: deps.manager_secret,
        inbound,
        alert: deps.alert,
    });

    let tasks = vec![
        BackgroundTask::Discovery {
            pool: router_pool.clone(),
            admin: deps.admin.clone(),
            identifier: deps.identifier.clone(),
            router_secret: deps.router_secret,
            directory: directory.clone(),
            dispatcher: router_messages,
        },
        BackgroundTask::SettingsRefresh {
            admin: deps.admin.clone(),
            settings: settings.clone(),
        },
        BackgroundTask::StatusPing {
            admin: deps.admin.clone(),
            identifier: deps.identifier.clone(),
            directory,
            settings: settings.clone(),
        },
        BackgroundTask::PerformancePing {
            admin: deps.admin,
            identifier: deps.identifier,
            performance,
        },
        BackgroundTask::OfflineQueueFlush {
            interval: deps.offline_flush_interval,
            offline_queue,
            device_tokens: deps.device_tokens,
            push_gateway: deps.push_gateway,
            settings,
        },
    ];

    (state, tasks)
}

/// One periodic background loop, deferred as data so `serve` can decide
/// how to spawn it (and tests can construct `build_state`'s output without
/// starting anything).
pub enum BackgroundTask {
    Discovery {
        pool: Arc<RouterPool>,
        admin: AdminClient,
        identifier: String,
        router_secret: String,
        directory: Arc<UserDirectory>,
        dispatcher: Arc<RouterMessageService>,
    },
    SettingsRefresh {
        admin: AdminClient,
        settings: Arc<ApplicationSettingsCache>,
    },
    StatusPing {
        admin: AdminClient,
        identifier: String,
        directory: Arc<UserDirectory>,
        settings: Arc<ApplicationSettingsCache>,
    },
    PerformancePing {
        admin: AdminClient,
        identifier: String,
        performance: Arc<PerformanceCounters>,
    },
    OfflineQueueFlush {
        interval: std::time::Duration,
        offline_queue: Arc<OfflineQueue>,
        device_tokens: Arc<dyn DeviceTokenDirectory>,
        push_gateway: Arc<dyn PushGateway>,
        settings: Arc<ApplicationSettingsCache>,
    },
}

impl BackgroundTask {
    fn spawn(self) -> tokio::task::JoinHandle<()> {
        match self {
            BackgroundTask::Discovery { pool, admin, identifier, router_secret, directory, dispatcher } => {
                tokio::spawn(pool.run_discovery_loop(admin, identifier, router_secret, directory, dispatcher))
            },
            BackgroundTask::SettingsRefresh { admin, settings } => {
                tokio::spawn(peripherals::run_settings_refresh_loop(admin, settings))
            },
            BackgroundTask::StatusPing { admin, identifier, directory, settings } => {
                tokio::spawn(peripherals::run_status_ping_loop(admin, identifier, directory, settings))
            },
            BackgroundTask::PerformancePing { admin, identifier, performance } => {
                tokio::spawn(peripherals::run_performance_ping_loop(admin, identifier, performance))
            },
            BackgroundTask::OfflineQueueFlush { interval, offline_queue, device_tokens, push_gateway, settings } => {
                tokio::spawn(peripherals::run_offline_queue_flush_loop(interval, offline_queue, device_tokens, push_gateway, settings))
            },
        }
    }
}

/// Build the ES's axum application. `§4.5` step 1 requires the path to
/// *contain* `/socket`, not match it exactly (a client may upgrade at
/// `/socket/` or `/v1/socket`), so every path is routed to
/// `gateway::upgrade_handler` via `fallback` and the `contains` check there
/// is what actually gates acceptance.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .fallback(gateway::upgrade_handler)
        .with_state(state)
}

/// Run the edge server until the listener is closed, after spawning every
/// peripheral loop (`§5`).
pub async fn serve(bind_addr: SocketAddr, state: Arc<AppState>, tasks: Vec<BackgroundTask>) -> std::io::Result<()> {
    for task in tasks {
        task.spawn();
    }

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    info!(%bind_addr, "edge: listening for client connections");
    axum::serve(listener, app).await
}
