//! The edge server's periodic background loops (`§5`, `§6.5`): settings
//! refresh, status/performance reporting to the admin API, and the offline
//! push-notification flush. None of these loops ever abort the process on
//! a single failed tick — each backend call already degrades gracefully
//! (`chat_fabric_admin_client`'s contract) or is itself best-effort.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tracing::{debug, info, warn};

use chat_fabric_admin_client::AdminClient;
use chat_fabric_alert::AlertChannel;
use chat_fabric_push::{DeviceTokenDirectory, PushGateway, PushNotification, application_id_from_composite_key};

use crate::directory::UserDirectory;
use crate::offline_queue::OfflineQueue;
use crate::performance::PerformanceCounters;
use crate::settings::ApplicationSettingsCache;

/// Status-ping and manager `CONNECTED_USERS_INFO` cadence (`§5`).
pub const PING_INTERVAL: Duration = Duration::from_secs(300);
/// Performance-report cadence (`§5`).
pub const PERFORMANCE_PING_INTERVAL: Duration = Duration::from_secs(300);
/// `ApplicationSettingsCache` refresh cadence (`§5`).
pub const SETTINGS_REFRESH_INTERVAL: Duration = Duration::from_secs(900);

/// `§4.5` step 5's backing data: reload every known application's settings
/// wholesale on each tick.
pub async fn run_settings_refresh_loop(admin: AdminClient, settings: Arc<ApplicationSettingsCache>) {
    loop {
        let applications = admin.list_applications().await;
        debug!(count = applications.len(), "edge: refreshed application settings");
        settings.replace(applications);
        tokio::time::sleep(SETTINGS_REFRESH_INTERVAL).await;
    }
}

/// `§6.2`'s `report-status`: how many clients this edge server currently
/// holds open, by application.
pub async fn run_status_ping_loop(admin: AdminClient, identifier: String, directory: Arc<UserDirectory>, settings: Arc<ApplicationSettingsCache>) {
    loop {
        let connected_clients_count = directory.len() as u64;
        let application_data = json!(settings.connected_users_snapshot());
        admin.report_status(&identifier, connected_clients_count, application_data).await;
        debug!(connected_clients_count, "edge: reported status to admin API");
        tokio::time::sleep(PING_INTERVAL).await;
    }
}

/// `§6.2`'s `report-performance`: `PerformanceCounters::snapshot_and_reset`
/// on each tick, timestamped from the previous tick to now.
pub async fn run_performance_ping_loop(admin: AdminClient, identifier: String, performance: Arc<PerformanceCounters>) {
    let mut window_start = Utc::now();
    loop {
        tokio::time::sleep(PERFORMANCE_PING_INTERVAL).await;
        let window_end = Utc::now();
        let performance_data = performance.snapshot_and_reset();
        admin.report_performance(&identifier, window_start, window_end, performance_data).await;
        window_start = window_end;
    }
}

/// `§4.8`: every `FCM_NOTIFICATION_SEC_INTERVAL` seconds, snapshot and clear
/// the offline queue, look up each recipient's device tokens and
/// application-scoped push credential, and hand the grouped notifications
/// to the `PushGateway`. A missing per-application credential silently
/// drops that recipient's group rather than failing the whole tick.
pub async fn run_offline_queue_flush_loop(
    interval: Duration,
    offline_queue: Arc<OfflineQueue>,
    device_tokens: Arc<dyn DeviceTokenDirectory>,
    push_gateway: Arc<dyn PushGateway>,
    settings: Arc<ApplicationSettingsCache>,
) {
    loop {
        tokio::time::sleep(interval).await;
        let pending = offline_queue.snapshot_and_clear();
        if pending.is_empty() {
            continue;
        }
        info!(count = pending.len(), "edge: flushing offline notification queue");

        for (app_user_identifier, queued) in pending {
            let Some(application_id) = application_id_from_composite_key(&app_user_identifier) else {
                warn!(app_user_identifier = %app_user_identifier, "edge: offline recipient id has no embedded application id, dropping");
                continue;
            };
            let Some(application_settings) = settings.get(application_id) else {
                debug!(application_id = %application_id, "edge: no settings for application, dropping offline notification");
                continue;
            };
            let Some(firebase_server_key) = application_settings.firebase_server_key else {
                debug!(application_id = %application_id, "edge: missing push credential, dropping offline notification group");
                continue;
            };

            let tokens = match device_tokens.tokens_for(&app_user_identifier).await {
                Ok(tokens) => tokens,
                Err(err) => {
                    warn!(app_user_identifier = %app_user_identifier, error = %err, "edge: device token lookup failed, dropping offline notification");
                    continue;
                },
            };

            let notification = PushNotification::new(
                app_user_identifier.clone(),
                queued.chat_room_identifier.clone(),
                queued.sender_application_user_identifier.clone(),
                queued.message.clone(),
            );

            for device_token in &tokens {
                // Offloaded conceptually to a worker thread by virtue of
                // `PushGateway::send` being `async` and spawned per-call;
                // one failed device token never blocks the others.
                let gateway = push_gateway.clone();
                let notification = notification.clone();
                let firebase_server_key = firebase_server_key.clone();
                let device_token = device_token.clone();
                tokio::spawn(async move {
                    if let Err(err) = gateway.send(&firebase_server_key, &device_token, &notification).await {
                        warn!(device_token = %device_token, error = %err, "edge: push send failed");
                    }
                });
            }
        }
    }
}

/// `§6.4`'s degrade-to-logging fatal-alert path: the admin API's startup
/// fetch failing is fatal for the *calling* binary, but any *runtime*
/// control-surface degradation should still reach an operator via
/// `AlertChannel` rather than only a log line.
pub async fn alert_once(alert: &dyn AlertChannel, exception_class: &str, subject: &str, body: &str) {
    if let Err(err) = alert.send(exception_class, subject, body).await {
        warn!(error = %err, "edge: alert channel itself failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intervals_match_the_documented_cadences() {
        assert_eq!(PING_INTERVAL, Duration::from_secs(300));
        assert_eq!(PERFORMANCE_PING_INTERVAL, Duration::from_secs(300));
        assert_eq!(SETTINGS_REFRESH_INTERVAL, Duration::from_secs(900));
    }
}
