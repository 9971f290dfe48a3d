//! The push-notification gateway used to deliver offline notifications
//! (`§1` OUT OF SCOPE, `§4.8`), specified only through its interface here: a
//! `PushGateway` trait, a cached `DeviceTokenDirectory` lookup, and a
//! logging-only stub implementation of each for operators without a
//! production push backend wired up.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tracing::info;

use chat_fabric_protocol::OFFLINE_NOTIFICATION_CLICK_ACTION;

/// Cache TTL for device push token lookups (`§4.8`: "cached ~12 h").
pub const DEVICE_TOKEN_CACHE_TTL: Duration = Duration::from_secs(12 * 60 * 60);

#[derive(Error, Debug)]
pub enum Error {
    #[error("push send failed: {0}")]
    SendFailed(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// One offline notification, ready to hand to the push gateway. Carries the
/// `click_action` annotation documented in `§3.1`/`§4.8`; this field is not
/// part of the CR→ES `OFFLINE_NOTIFICATION` wire frame, it is added here.
#[derive(Debug, Clone)]
pub struct PushNotification {
    pub application_user_identifier: String,
    pub chat_room_identifier: String,
    pub sender_application_user_identifier: String,
    pub message: Value,
    pub click_action: String,
}

impl PushNotification {
    pub fn new(
        application_user_identifier: impl Into<String>,
        chat_room_identifier: impl Into<String>,
        sender_application_user_identifier: impl Into<String>,
        message: Value,
    ) -> Self {
        Self {
            application_user_identifier: application_user_identifier.into(),
            chat_room_identifier: chat_room_identifier.into(),
            sender_application_user_identifier: sender_application_user_identifier.into(),
            message,
            click_action: OFFLINE_NOTIFICATION_CLICK_ACTION.to_string(),
        }
    }
}

/// Sends one push message to one device token. Implementations talk to
/// whatever push backend (FCM, APNs, …) the deployment actually uses; a
/// missing per-application credential is the caller's responsibility to
/// check before invoking `send` (`§4.8`: "missing per-application push
/// credentials silently drops that group").
#[async_trait]
pub trait PushGateway: Send + Sync {
    async fn send(
        &self,
        firebase_server_key: &str,
        device_token: &str,
        notification: &PushNotification,
    ) -> Result<()>;
}

/// Logging-only stub: records what would have been sent and returns `Ok`.
/// This is the default until a deployment wires up a real push backend.
#[derive(Debug, Default)]
pub struct LoggingPushGateway;

#[async_trait]
impl PushGateway for LoggingPushGateway {
    async fn send(
        &self,
        _firebase_server_key: &str,
        device_token: &str,
        notification: &PushNotification,
    ) -> Result<()> {
        info!(
            device_token = %device_token,
            app_user_identifier = %notification.application_user_identifier,
            chat_room_identifier = %notification.chat_room_identifier,
            click_action = %notification.click_action,
            "push: (stub) would deliver offline notification"
        );
        Ok(())
    }
}

/// Looks up device push tokens for a user. `§4.8` caches this lookup for
/// `DEVICE_TOKEN_CACHE_TTL`; the cache wraps any backing directory so a
/// production implementation only needs to answer the uncached query.
#[async_trait]
pub trait DeviceTokenDirectory: Send + Sync {
    async fn tokens_for(&self, app_user_identifier: &str) -> Result<Vec<String>>;
}

/// Derives the cache-keying application id from an `app_user_id` composite
/// by splitting on `:` and taking index 1 — a convention distinct from (and
/// not to be conflated with) the token's trailing-segment application id
/// used for session/token validation (`§3.1`).
pub fn application_id_from_composite_key(app_user_identifier: &str) -> Option<&str> {
    app_user_identifier.split(':').nth(1)
}

struct CacheEntry {
    tokens: Vec<String>,
    cached_at: Instant,
}

/// A TTL-caching wrapper around any `DeviceTokenDirectory`.
pub struct CachedDeviceTokenDirectory<D> {
    inner: D,
    ttl: Duration,
    cache: Mutex<HashMap<String, CacheEntry>>,
}

impl<D: DeviceTokenDirectory> CachedDeviceTokenDirectory<D> {
    pub fn new(inner: D) -> Self {
        Self::with_ttl(inner, DEVICE_TOKEN_CACHE_TTL)
    }

    pub fn with_ttl(inner: D, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            cache: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl<D: DeviceTokenDirectory> DeviceTokenDirectory for CachedDeviceTokenDirectory<D> {
    async fn tokens_for(&self, app_user_identifier: &str) -> Result<Vec<String>> {
        {
            let cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(entry) = cache.get(app_user_identifier) {
                if entry.cached_at.elapsed() < self.ttl {
                    return Ok(entry.tokens.clone());
                }
            }
        }
        let tokens = self.inner.tokens_for(app_user_identifier).await?;
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        cache.insert(
            app_user_identifier.to_string(),
            CacheEntry {
                tokens: tokens.clone(),
                cached_at: Instant::now(),
            },
        );
        Ok(tokens)
    }
}

/// An in-memory `DeviceTokenDirectory`, for tests and backend-less runs.
#[derive(Default)]
pub struct InMemoryDeviceTokenDirectory {
    tokens: HashMap<String, Vec<String>>,
}

impl InMemoryDeviceTokenDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, app_user_identifier: impl Into<String>, tokens: Vec<String>) {
        self.tokens.insert(app_user_identifier.into(), tokens);
    }
}

#[async_trait]
impl DeviceTokenDirectory for InMemoryDeviceTokenDirectory {
    async fn tokens_for(&self, app_user_identifier: &str) -> Result<Vec<String>> {
        Ok(self.tokens.get(app_user_identifier).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn composite_key_splits_on_colon_taking_second_segment() {
        assert_eq!(application_id_from_composite_key("u:app-1:d1"), Some("app-1"));
        assert_eq!(application_id_from_composite_key("no-colons"), None);
    }

    #[tokio::test]
    async fn cached_directory_serves_from_cache_within_ttl() {
        let mut inner = InMemoryDeviceTokenDirectory::new();
        inner.insert("u1", vec!["tok-1".into()]);
        let cached = CachedDeviceTokenDirectory::with_ttl(inner, Duration::from_secs(60));
        assert_eq!(cached.tokens_for("u1").await.unwrap(), vec!["tok-1"]);
        assert_eq!(cached.tokens_for("u1").await.unwrap(), vec!["tok-1"]);
    }

    #[tokio::test]
    async fn logging_stub_never_fails() {
        let gateway = LoggingPushGateway;
        let notification = PushNotification::new("u1", "room-1", "u2", Value::Null);
        assert!(gateway.send("key", "device-token", &notification).await.is_ok());
    }
}
