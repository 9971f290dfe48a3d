//! The external configuration/admin HTTP API client (`§6.2`), shared by both
//! the edge server and the central router: router/edge discovery,
//! application settings, and status/performance reporting.
//!
//! Grounded in the original implementation's graceful-degradation contract
//! (`§6.2`): a non-2xx response, a connection failure, or a deserialization
//! error on a read endpoint never propagates to the caller as an `Err` — it
//! is logged at an appropriate level and the call degrades to an empty
//! result, so one bad control-surface tick never takes down a periodic
//! loop. The two `report-*` POSTs are fire-and-forget and are simply logged
//! on failure.

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, warn};

const CONTROL_SURFACE_PATH: &str = "internal-server-to-server/v1";
const SECRET_HEADER: &str = "X-CHAT-INTERNAL-SECRET";

/// One entry of `GET chat-server/` — used by the CR at startup to compute
/// `expected_edge_count` (`§4.1`).
#[derive(Debug, Clone, Deserialize)]
pub struct ChatServerInstance {
    pub identifier: String,
    pub instances: u32,
}

/// One entry of `GET chat-central-router/` — used by the ES `RouterPool`
/// discovery loop (`§4.4`).
#[derive(Debug, Clone, Deserialize)]
pub struct CentralRouterInstance {
    pub identifier: String,
    pub public_ip: String,
}

/// One entry of `GET applications/`'s `results` array.
#[derive(Debug, Clone, Deserialize)]
pub struct ApplicationSettings {
    pub identifier: String,
    pub is_chat_active: bool,
    pub max_concurrent_online_users: u32,
    #[serde(default)]
    pub firebase_server_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApplicationsEnvelope {
    results: Vec<ApplicationSettings>,
}

#[derive(Debug, Serialize)]
struct ReportStatusBody<'a> {
    identifier: &'a str,
    connected_clients_count: u64,
    application_data: Value,
}

#[derive(Debug, Serialize)]
struct ReportPerformanceBody<'a> {
    identifier: &'a str,
    timestamp_from: String,
    timestamp_to: String,
    performance_data: Value,
}

/// HTTP client for the admin/configuration control surface.
#[derive(Debug, Clone)]
pub struct AdminClient {
    http: Client,
    base_url: String,
    secret: String,
}

impl AdminClient {
    pub fn new(base_url: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            http: Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            secret: secret.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{CONTROL_SURFACE_PATH}/{path}", self.base_url)
    }

    /// `GET chat-server/`. Degrades to an empty vec on any failure.
    pub async fn list_chat_servers(&self) -> Vec<ChatServerInstance> {
        self.get_json("chat-server/").await.unwrap_or_default()
    }

    /// `GET chat-central-router/`. Degrades to an empty vec on any failure.
    pub async fn list_central_routers(&self) -> Vec<CentralRouterInstance> {
        self.get_json("chat-central-router/").await.unwrap_or_default()
    }

    /// `GET applications/`. Degrades to an empty vec on any failure.
    pub async fn list_applications(&self) -> Vec<ApplicationSettings> {
        let envelope: Option<ApplicationsEnvelope> = self.get_json("applications/").await;
        envelope.map(|e| e.results).unwrap_or_default()
    }

    /// `POST chat-server-status/report-status/`. Fire-and-forget.
    pub async fn report_status(&self, identifier: &str, connected_clients_count: u64, application_data: Value) {
        let body = ReportStatusBody {
            identifier,
            connected_clients_count,
            application_data,
        };
        self.post_best_effort("chat-server-status/report-status/", &body).await;
    }

    /// `POST chat-server-status/report-performance/`. Fire-and-forget.
    /// Timestamps are ISO-8601 with microsecond precision and a `Z` suffix
    /// (`§6.2`).
    pub async fn report_performance(
        &self,
        identifier: &str,
        timestamp_from: DateTime<Utc>,
        timestamp_to: DateTime<Utc>,
        performance_data: Value,
    ) {
        let body = ReportPerformanceBody {
            identifier,
            timestamp_from: format_micros(timestamp_from),
            timestamp_to: format_micros(timestamp_to),
            performance_data,
        };
        self.post_best_effort("chat-server-status/report-performance/", &body)
            .await;
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, path: &str) -> Option<T> {
        let url = self.url(path);
        let response = match self.http.get(&url).header(SECRET_HEADER, &self.secret).send().await {
            Ok(resp) => resp,
            Err(err) => {
                warn!(url = %url, error = %err, "admin-client: request failed, degrading to empty");
                return None;
            },
        };

        let status = response.status();
        if status.is_server_error() {
            error!(url = %url, status = %status, "admin-client: server error, degrading to empty");
            return None;
        }
        if !status.is_success() {
            warn!(url = %url, status = %status, "admin-client: non-2xx response, degrading to empty");
            return None;
        }

        match response.json::<T>().await {
            Ok(value) => Some(value),
            Err(err) => {
                error!(url = %url, error = %err, "admin-client: failed to decode response, degrading to empty");
                None
            },
        }
    }

    async fn post_best_effort<B: Serialize>(&self, path: &str, body: &B) {
        let url = self.url(path);
        match self.http.post(&url).header(SECRET_HEADER, &self.secret).json(body).send().await {
            Ok(resp) if resp.status() == StatusCode::OK || resp.status().is_success() => {},
            Ok(resp) => warn!(url = %url, status = %resp.status(), "admin-client: report call returned non-2xx"),
            Err(err) => warn!(url = %url, error = %err, "admin-client: report call failed"),
        }
    }
}

fn format_micros(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn list_chat_servers_degrades_to_empty_on_5xx() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/internal-server-to-server/v1/chat-server/")
            .with_status(500)
            .create_async()
            .await;
        let client = AdminClient::new(server.url(), "secret");
        assert!(client.list_chat_servers().await.is_empty());
    }

    #[tokio::test]
    async fn list_applications_parses_results_envelope() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/internal-server-to-server/v1/applications/")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"results":[{"identifier":"app-1","is_chat_active":true,"max_concurrent_online_users":100}]}"#,
            )
            .create_async()
            .await;
        let client = AdminClient::new(server.url(), "secret");
        let apps = client.list_applications().await;
        assert_eq!(apps.len(), 1);
        assert_eq!(apps[0].identifier, "app-1");
        assert!(apps[0].is_chat_active);
    }

    #[tokio::test]
    async fn list_central_routers_degrades_to_empty_on_transport_failure() {
        // Port 1 on localhost is reliably refused or unroutable.
        let client = AdminClient::new("http://127.0.0.1:1", "secret");
        assert!(client.list_central_routers().await.is_empty());
    }

    #[test]
    fn report_performance_timestamps_use_microsecond_precision_with_z_suffix() {
        let ts = DateTime::parse_from_rfc3339("2026-07-27T10:00:00.123456Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(format_micros(ts), "2026-07-27T10:00:00.123456Z");
    }
}
