//! Typed, validated configuration for the two binaries (`§6.5`, `§6.6`).
//!
//! Every field here is `#[clap(long, env)]`: a flag with an env-var
//! fallback, so a containerized deployment with no flags at all is fully
//! configurable from its environment. Parsing happens eagerly at process
//! startup (`EdgeConfig::parse_and_validate` / `RouterConfig::parse_and_validate`)
//! so a misconfigured deployment fails before any socket is opened, rather
//! than surfacing as a runtime error deep in a connection handler.

use std::net::SocketAddr;

use clap::Args;
use thiserror::Error;

/// Upper bound on `GET_HISTORY`'s `limit` absent any narrower per-app cap
/// (`§4.6`); mirrors `chat_fabric_protocol::DEFAULT_HISTORY_LIMIT` without
/// pulling in a protocol-crate dependency for one constant.
const DEFAULT_HISTORY_LIMIT: u32 = 20;

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Shared control-surface settings: every deployment of either binary talks
/// to the same admin API (`§6.2`).
#[derive(Args, Debug, Clone)]
pub struct AdminApiArgs {
    /// Base URL of the admin/configuration HTTP API.
    #[clap(long, env = "CHAT_API_URL")]
    pub chat_api_url: String,

    /// Shared secret sent as `X-CHAT-INTERNAL-SECRET` on every admin API call.
    #[clap(long, env = "CHAT_API_INTERNAL_SECRET")]
    pub chat_api_internal_secret: String,
}

/// Outbound-mail settings for the `AlertChannel` peripheral (`§6.5`
/// `EMAIL_*`/`ADMINS`).
#[derive(Args, Debug, Clone)]
pub struct AlertArgs {
    /// Comma-separated list of admin recipient addresses.
    #[clap(long, env = "ADMINS", value_delimiter = ',')]
    pub admins: Vec<String>,

    /// SMTP host used to deliver admin alert emails. Unset falls back to a
    /// logging-only alert channel.
    #[clap(long, env = "EMAIL_HOST")]
    pub email_host: Option<String>,

    /// SMTP port.
    #[clap(long, env = "EMAIL_PORT", default_value_t = 587)]
    pub email_port: u16,

    /// SMTP username.
    #[clap(long, env = "EMAIL_USERNAME")]
    pub email_username: Option<String>,

    /// SMTP password.
    #[clap(long, env = "EMAIL_PASSWORD")]
    pub email_password: Option<String>,

    /// `From:` address on admin alert emails.
    #[clap(long, env = "EMAIL_FROM")]
    pub email_from: Option<String>,
}

/// Durable table-store settings (`§6.5` `AWS_*`, five table names,
/// `MAX_DYNAMO_MESSAGE_LIMIT`). The table store itself is an external
/// collaborator (`§1` out of scope); these settings exist so a production
/// deployment can still be driven entirely from its environment.
#[derive(Args, Debug, Clone)]
pub struct TableStoreArgs {
    #[clap(long, env = "AWS_REGION")]
    pub aws_region: Option<String>,
    #[clap(long, env = "AWS_ACCESS_KEY_ID")]
    pub aws_access_key_id: Option<String>,
    #[clap(long, env = "AWS_SECRET_ACCESS_KEY")]
    pub aws_secret_access_key: Option<String>,

    #[clap(long, env = "SESSION_TABLE_NAME")]
    pub session_table_name: Option<String>,
    #[clap(long, env = "CHAT_ROOM_TABLE_NAME")]
    pub chat_room_table_name: Option<String>,
    #[clap(long, env = "CHAT_MESSAGE_TABLE_NAME")]
    pub chat_message_table_name: Option<String>,
    #[clap(long, env = "LAST_MESSAGE_READ_TABLE_NAME")]
    pub last_message_read_table_name: Option<String>,
    #[clap(long, env = "CUSTOM_DATA_TABLE_NAME")]
    pub custom_data_table_name: Option<String>,

    /// Upper bound on `GET_HISTORY`'s `limit` (`§4.6`).
    #[clap(long, env = "MAX_DYNAMO_MESSAGE_LIMIT", default_value_t = DEFAULT_HISTORY_LIMIT)]
    pub max_dynamo_message_limit: u32,
}

/// Logging settings shared by both binaries (`§6.6`).
#[derive(Args, Debug, Clone)]
pub struct LoggingArgs {
    /// `tracing-subscriber` env-filter string. Defaults from `DEBUG`/`LOG_LEVEL`
    /// when unset.
    #[clap(long, env = "LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Enables verbose (debug-level) logging when no explicit filter is given.
    #[clap(long, env = "DEBUG", default_value_t = false)]
    pub debug: bool,

    /// Directory to write a log file into; falls back to stdout when unset.
    #[clap(long, env = "LOG_FILE_DIRECTORY")]
    pub log_file_directory: Option<String>,

    /// Log file name, used only when `log_file_directory` is set.
    #[clap(long, env = "LOG_FILE_NAME")]
    pub log_file_name: Option<String>,
}

impl LoggingArgs {
    /// Resolves the effective `tracing-subscriber` env-filter string: an
    /// explicit `log_level` wins, otherwise `DEBUG` selects between `debug`
    /// and `info` (`§6.6`).
    pub fn resolved_filter(&self) -> String {
        match &self.log_level {
            Some(explicit) => explicit.clone(),
            None if self.debug => "debug".to_string(),
            None => "info".to_string(),
        }
    }
}

/// Edge server configuration (`§2`, `§4.5`, `§6.5`).
#[derive(Args, Debug, Clone)]
pub struct EdgeConfig {
    #[clap(flatten)]
    pub admin_api: AdminApiArgs,

    #[clap(flatten)]
    pub alert: AlertArgs,

    #[clap(flatten)]
    pub table_store: TableStoreArgs,

    #[clap(flatten)]
    pub logging: LoggingArgs,

    /// Shared secret presented to every central router on connect
    /// (`§4.2`'s `x-router-internal-secret` header).
    #[clap(long, env = "CENTRAL_ROUTER_INTERNAL_SECRET")]
    pub central_router_internal_secret: String,

    /// Shared secret that marks an incoming client socket as the
    /// manager-protocol surface (`§3.1`).
    #[clap(long, env = "MANAGER_SECRET")]
    pub manager_secret: String,

    /// This edge server's own identifier, sent to the CR as
    /// `x-websocket-server-identifier` and reported to the admin API.
    #[clap(long, env = "WEBSOCKET_SERVER_IDENTIFIER")]
    pub websocket_server_identifier: String,

    /// Address this edge server's client-facing websocket listener binds to.
    #[clap(long, env = "EDGE_BIND_ADDR", default_value = "0.0.0.0:8080")]
    pub edge_bind_addr: SocketAddr,

    /// Offline-queue flush cadence, in seconds (`§4.8`).
    #[clap(long, env = "FCM_NOTIFICATION_SEC_INTERVAL", default_value_t = 60)]
    pub fcm_notification_sec_interval: u64,
}

impl EdgeConfig {
    fn validate(&self) -> Result<()> {
        if self.admin_api.chat_api_url.trim().is_empty() {
            return Err(Error::Invalid("CHAT_API_URL must not be empty".into()));
        }
        if self.websocket_server_identifier.trim().is_empty() {
            return Err(Error::Invalid("WEBSOCKET_SERVER_IDENTIFIER must not be empty".into()));
        }
        if self.fcm_notification_sec_interval == 0 {
            return Err(Error::Invalid("FCM_NOTIFICATION_SEC_INTERVAL must be positive".into()));
        }
        Ok(())
    }

    /// Validates an already-parsed config (`§6.6`: fail before any socket
    /// opens). The `cli` binary parses `EdgeConfig` as part of its own
    /// `clap::Parser` derive and calls this immediately afterward.
    pub fn validated(self) -> Result<Self> {
        self.validate()?;
        Ok(self)
    }
}

/// Central router configuration (`§2`, `§4.1`-`§4.4`, `§6.5`).
#[derive(Args, Debug, Clone)]
pub struct RouterConfig {
    #[clap(flatten)]
    pub admin_api: AdminApiArgs,

    #[clap(flatten)]
    pub alert: AlertArgs,

    #[clap(flatten)]
    pub logging: LoggingArgs,

    /// Shared secret every connecting edge server must present
    /// (`§4.2`'s `x-router-internal-secret` header).
    #[clap(long, env = "CENTRAL_ROUTER_INTERNAL_SECRET")]
    pub central_router_internal_secret: String,

    /// This router's own identifier, reported to the admin API.
    #[clap(long, env = "CENTRAL_ROUTER_IDENTIFIER")]
    pub central_router_identifier: String,

    /// Address this router's edge-facing websocket listener binds to.
    #[clap(long, env = "ROUTER_BIND_ADDR", default_value = "0.0.0.0:9090")]
    pub router_bind_addr: SocketAddr,
}

impl RouterConfig {
    fn validate(&self) -> Result<()> {
        if self.admin_api.chat_api_url.trim().is_empty() {
            return Err(Error::Invalid("CHAT_API_URL must not be empty".into()));
        }
        if self.central_router_identifier.trim().is_empty() {
            return Err(Error::Invalid("CENTRAL_ROUTER_IDENTIFIER must not be empty".into()));
        }
        Ok(())
    }

    /// Validates an already-parsed config (`§6.6`).
    pub fn validated(self) -> Result<Self> {
        self.validate()?;
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct EdgeHarness {
        #[clap(flatten)]
        config: EdgeConfig,
    }

    #[derive(Parser)]
    struct RouterHarness {
        #[clap(flatten)]
        config: RouterConfig,
    }

    #[test]
    fn edge_config_parses_from_flags_and_validates() {
        let harness = EdgeHarness::parse_from([
            "edge",
            "--chat-api-url",
            "http://admin.internal",
            "--chat-api-internal-secret",
            "s1",
            "--central-router-internal-secret",
            "s2",
            "--manager-secret",
            "s3",
            "--websocket-server-identifier",
            "es-1",
        ]);
        assert_eq!(harness.config.admin_api.chat_api_url, "http://admin.internal");
        assert_eq!(harness.config.fcm_notification_sec_interval, 60);
        assert!(harness.config.validated().is_ok());
    }

    #[test]
    fn edge_config_rejects_blank_identifier() {
        let harness = EdgeHarness::parse_from([
            "edge",
            "--chat-api-url",
            "http://admin.internal",
            "--chat-api-internal-secret",
            "s1",
            "--central-router-internal-secret",
            "s2",
            "--manager-secret",
            "s3",
            "--websocket-server-identifier",
            "",
        ]);
        assert!(harness.config.validated().is_err());
    }

    #[test]
    fn logging_args_resolve_debug_flag_when_no_explicit_level() {
        let logging = LoggingArgs {
            log_level: None,
            debug: true,
            log_file_directory: None,
            log_file_name: None,
        };
        assert_eq!(logging.resolved_filter(), "debug");
    }

    #[test]
    fn logging_args_prefer_explicit_level_over_debug_flag() {
        let logging = LoggingArgs {
            log_level: Some("warn".to_string()),
            debug: true,
            log_file_directory: None,
            log_file_name: None,
        };
        assert_eq!(logging.resolved_filter(), "warn");
    }

    #[test]
    fn router_config_parses_from_flags_and_validates() {
        let harness = RouterHarness::parse_from([
            "router",
            "--chat-api-url",
            "http://admin.internal",
            "--chat-api-internal-secret",
            "s1",
            "--central-router-internal-secret",
            "s2",
            "--central-router-identifier",
            "cr-1",
        ]);
        assert!(harness.config.validated().is_ok());
    }
}
