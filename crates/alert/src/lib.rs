//! The SMTP-based admin alert channel (`§1` OUT OF SCOPE, `§7` policy:
//! "Admin email is rate-limited per exception class (default 1 h)").
//!
//! Specified only through its interface: an `AlertChannel` trait, a
//! rate-limiting decorator, an SMTP implementation, and a logging-only stub.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor, message::Mailbox,
    transport::smtp::authentication::Credentials,
};
use thiserror::Error;
use tracing::{error, info};

/// Default per-exception-class suppression window (`§7`).
pub const DEFAULT_RATE_LIMIT_WINDOW: Duration = Duration::from_secs(60 * 60);

#[derive(Error, Debug)]
pub enum Error {
    #[error("failed to build alert message: {0}")]
    Build(String),
    #[error("failed to send alert: {0}")]
    Send(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Sends one admin alert for a named exception class.
#[async_trait]
pub trait AlertChannel: Send + Sync {
    async fn send(&self, exception_class: &str, subject: &str, body: &str) -> Result<()>;
}

/// Logging-only stub: records what would have been emailed. Default until a
/// deployment wires up SMTP credentials.
#[derive(Debug, Default)]
pub struct LoggingAlertChannel;

#[async_trait]
impl AlertChannel for LoggingAlertChannel {
    async fn send(&self, exception_class: &str, subject: &str, body: &str) -> Result<()> {
        error!(exception_class = %exception_class, subject = %subject, body = %body, "alert: (stub) would email admins");
        Ok(())
    }
}

/// SMTP configuration for the production `AlertChannel`.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from: String,
    pub admins: Vec<String>,
}

/// Sends admin alerts over SMTP via `lettre`.
pub struct SmtpAlertChannel {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    admins: Vec<Mailbox>,
}

impl SmtpAlertChannel {
    pub fn new(config: SmtpConfig) -> Result<Self> {
        let creds = Credentials::new(config.username, config.password);
        let transport = AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
            .map_err(|e| Error::Build(e.to_string()))?
            .port(config.port)
            .credentials(creds)
            .build();

        let from: Mailbox = config.from.parse().map_err(|e: lettre::address::AddressError| Error::Build(e.to_string()))?;
        let admins = config
            .admins
            .iter()
            .map(|a| a.parse::<Mailbox>().map_err(|e| Error::Build(e.to_string())))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            transport,
            from,
            admins,
        })
    }
}

#[async_trait]
impl AlertChannel for SmtpAlertChannel {
    async fn send(&self, exception_class: &str, subject: &str, body: &str) -> Result<()> {
        for admin in &self.admins {
            let email = Message::builder()
                .from(self.from.clone())
                .to(admin.clone())
                .subject(format!("[{exception_class}] {subject}"))
                .body(body.to_string())
                .map_err(|e| Error::Build(e.to_string()))?;

            self.transport
                .send(email)
                .await
                .map_err(|e| Error::Send(e.to_string()))?;
        }
        info!(exception_class = %exception_class, recipients = self.admins.len(), "alert: sent admin email");
        Ok(())
    }
}

/// Decorates any `AlertChannel` with the `§7` "1/h per exception class"
/// suppression policy: a second alert for the same class within the window
/// is silently dropped rather than forwarded.
pub struct RateLimitedAlertChannel<A> {
    inner: A,
    window: Duration,
    last_sent: Mutex<HashMap<String, Instant>>,
}

impl<A: AlertChannel> RateLimitedAlertChannel<A> {
    pub fn new(inner: A) -> Self {
        Self::with_window(inner, DEFAULT_RATE_LIMIT_WINDOW)
    }

    pub fn with_window(inner: A, window: Duration) -> Self {
        Self {
            inner,
            window,
            last_sent: Mutex::new(HashMap::new()),
        }
    }

    fn should_send(&self, exception_class: &str) -> bool {
        let mut last_sent = self.last_sent.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        match last_sent.get(exception_class) {
            Some(last) if now.duration_since(*last) < self.window => false,
            _ => {
                last_sent.insert(exception_class.to_string(), now);
                true
            },
        }
    }
}

#[async_trait]
impl<A: AlertChannel> AlertChannel for RateLimitedAlertChannel<A> {
    async fn send(&self, exception_class: &str, subject: &str, body: &str) -> Result<()> {
        if !self.should_send(exception_class) {
            return Ok(());
        }
        self.inner.send(exception_class, subject, body).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingChannel {
        sent: AtomicUsize,
    }

    #[async_trait]
    impl AlertChannel for CountingChannel {
        async fn send(&self, _exception_class: &str, _subject: &str, _body: &str) -> Result<()> {
            self.sent.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn suppresses_repeat_alerts_for_the_same_class_within_the_window() {
        let limited = RateLimitedAlertChannel::with_window(CountingChannel::default(), Duration::from_secs(3600));
        limited.send("DnsConnectionsException", "s", "b").await.unwrap();
        limited.send("DnsConnectionsException", "s", "b").await.unwrap();
        assert_eq!(limited.inner.sent.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn distinct_exception_classes_are_independently_rate_limited() {
        let limited = RateLimitedAlertChannel::with_window(CountingChannel::default(), Duration::from_secs(3600));
        limited.send("ClassA", "s", "b").await.unwrap();
        limited.send("ClassB", "s", "b").await.unwrap();
        assert_eq!(limited.inner.sent.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn allows_a_second_alert_once_the_window_has_elapsed() {
        let limited = RateLimitedAlertChannel::with_window(CountingChannel::default(), Duration::from_millis(10));
        limited.send("ClassA", "s", "b").await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        limited.send("ClassA", "s", "b").await.unwrap();
        assert_eq!(limited.inner.sent.load(Ordering::SeqCst), 2);
    }
}
