use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use chat_fabric_admin_client::AdminClient;
use chat_fabric_alert::{AlertChannel, LoggingAlertChannel, RateLimitedAlertChannel, SmtpAlertChannel, SmtpConfig};
use chat_fabric_config::{EdgeConfig, LoggingArgs, RouterConfig};
use chat_fabric_push::{DeviceTokenDirectory, InMemoryDeviceTokenDirectory, LoggingPushGateway, PushGateway};
use chat_fabric_store::{
    InMemoryChatMessageStore, InMemoryChatRoomStore, InMemoryCustomDataStore, InMemoryLastMessageReadStore, InMemorySessionStore,
};

#[derive(Parser)]
#[command(name = "chat-fabric", about = "Realtime chat message routing fabric")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an edge server: terminates client websockets and routes to
    /// central routers.
    Edge {
        #[clap(flatten)]
        config: EdgeConfig,
    },
    /// Run a central router: a stateless-per-connection broker
    /// multiplexing traffic between edge servers.
    Router {
        #[clap(flatten)]
        config: RouterConfig,
    },
}

fn init_telemetry(logging: &LoggingArgs) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(logging.resolved_filter()));
    let registry = tracing_subscriber::registry().with(filter);
    registry.with(fmt::layer().with_ansi(true)).init();

    if logging.log_file_directory.is_some() {
        // A dedicated file-sink crate isn't part of this stack; a
        // `LOG_FILE_DIRECTORY` deployment still gets structured stdout
        // logging, which the process supervisor is expected to redirect.
        tracing::warn!("LOG_FILE_DIRECTORY is set but file-sink logging is not wired up; logging to stdout");
    }
}

/// Builds the `AlertChannel` from SMTP settings when present, rate-limited
/// per `§7`'s default 1 h suppression window; falls back to logging-only
/// when no SMTP host is configured (`§1` OUT OF SCOPE collaborator, wired
/// only through its interface).
fn build_alert_channel(args: &chat_fabric_config::AlertArgs) -> Arc<dyn AlertChannel> {
    match &args.email_host {
        Some(host) => {
            let config = SmtpConfig {
                host: host.clone(),
                port: args.email_port,
                username: args.email_username.clone().unwrap_or_default(),
                password: args.email_password.clone().unwrap_or_default(),
                from: args.email_from.clone().unwrap_or_default(),
                admins: args.admins.clone(),
            };
            match SmtpAlertChannel::new(config) {
                Ok(channel) => Arc::new(RateLimitedAlertChannel::new(channel)),
                Err(err) => {
                    tracing::error!(error = %err, "cli: failed to build SMTP alert channel, falling back to logging-only");
                    Arc::new(LoggingAlertChannel)
                },
            }
        },
        None => Arc::new(LoggingAlertChannel),
    }
}

async fn run_edge(config: EdgeConfig) -> anyhow::Result<()> {
    let config = config.validated()?;
    init_telemetry(&config.logging);
    info!(identifier = %config.websocket_server_identifier, "chat-fabric: starting edge server");

    let admin = AdminClient::new(config.admin_api.chat_api_url.clone(), config.admin_api.chat_api_internal_secret.clone());
    let alert = build_alert_channel(&config.alert);

    // In-memory stores stand in for the durable table store (`§1` OUT OF
    // SCOPE collaborator) until a production deployment wires up its own
    // `chat_fabric_store` implementation against the tables named by
    // `config.table_store`.
    let session_store: Arc<dyn chat_fabric_store::SessionStore> = Arc::new(InMemorySessionStore::default());
    let chat_rooms: Arc<dyn chat_fabric_store::ChatRoomStore> = Arc::new(InMemoryChatRoomStore::default());
    let chat_messages: Arc<dyn chat_fabric_store::ChatMessageStore> = Arc::new(InMemoryChatMessageStore::default());
    let last_message_read: Arc<dyn chat_fabric_store::LastMessageReadStore> = Arc::new(InMemoryLastMessageReadStore::default());
    let custom_data: Arc<dyn chat_fabric_store::CustomDataStore> = Arc::new(InMemoryCustomDataStore::default());

    let push_gateway: Arc<dyn PushGateway> = Arc::new(LoggingPushGateway);
    let device_tokens: Arc<dyn DeviceTokenDirectory> = Arc::new(InMemoryDeviceTokenDirectory::new());

    let deps = chat_fabric_edge::EdgeDeps {
        admin,
        identifier: config.websocket_server_identifier.clone(),
        router_secret: config.central_router_internal_secret.clone(),
        manager_secret: config.manager_secret.clone(),
        session_store,
        chat_rooms,
        chat_messages,
        last_message_read,
        custom_data,
        push_gateway,
        device_tokens,
        alert,
        max_history_limit: config.table_store.max_dynamo_message_limit,
        offline_flush_interval: std::time::Duration::from_secs(config.fcm_notification_sec_interval),
    };

    let (state, tasks) = chat_fabric_edge::build_state(deps);
    chat_fabric_edge::serve(config.edge_bind_addr, state, tasks).await?;
    Ok(())
}

async fn run_router(config: RouterConfig) -> anyhow::Result<()> {
    let config = config.validated()?;
    init_telemetry(&config.logging);
    info!(identifier = %config.central_router_identifier, "chat-fabric: starting central router");

    let admin = AdminClient::new(config.admin_api.chat_api_url.clone(), config.admin_api.chat_api_internal_secret.clone());
    let alert = build_alert_channel(&config.alert);

    // `§4.1`: the startup fetch is synchronous and its failure is fatal —
    // an admin API that cannot be reached means the CR would never learn
    // its `INITIALIZATION` barrier target, so every edge connection would
    // hang waiting for a mode transition that can never legitimately occur.
    let expected_edge_count = chat_fabric_router::fetch_expected_edge_count(&admin).await;
    if expected_edge_count == 0 {
        anyhow::bail!("admin API reported zero expected edge servers; refusing to start with an unreachable INITIALIZATION barrier");
    }

    let registry = Arc::new(chat_fabric_router::EdgeRegistry::new());
    let locator = Arc::new(chat_fabric_router::UserLocator::new());
    let mode = Arc::new(chat_fabric_router::ModeController::new(expected_edge_count));
    let dispatcher = chat_fabric_router::RouterDispatcher::new(registry.clone(), locator.clone(), mode.clone());

    let state = Arc::new(chat_fabric_router::AppState {
        registry,
        locator,
        mode,
        dispatcher,
        router_secret: config.central_router_internal_secret.clone(),
        alert,
    });

    chat_fabric_router::serve(config.router_bind_addr, state).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Commands::Edge { config } => run_edge(config).await,
        Commands::Router { config } => run_router(config).await,
    }
}
