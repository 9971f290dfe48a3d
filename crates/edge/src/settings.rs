//! `ApplicationSettings` cache and `ActiveUserCount` accounting (`§3`,
//! `§4.5` step 5, `§4.8`'s push-credential lookup).

use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU32, Ordering};

use dashmap::DashMap;

use chat_fabric_admin_client::ApplicationSettings;

/// Wholesale-replaced every `§6.5` `settings refresh` cadence tick.
#[derive(Default)]
pub struct ApplicationSettingsCache {
    settings: RwLock<HashMap<String, ApplicationSettings>>,
    active_counts: DashMap<String, AtomicU32>,
}

impl ApplicationSettingsCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// `§4.5` step 5's refresh: replace the whole settings map atomically.
    /// `ActiveUserCount` is untouched — it tracks live connections, not
    /// configuration.
    pub fn replace(&self, settings: Vec<ApplicationSettings>) {
        let map = settings.into_iter().map(|s| (s.identifier.clone(), s)).collect();
        *self.settings.write().unwrap_or_else(|e| e.into_inner()) = map;
    }

    pub fn get(&self, application_id: &str) -> Option<ApplicationSettings> {
        self.settings
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(application_id)
            .cloned()
    }

    fn counter(&self, application_id: &str) -> dashmap::mapref::one::RefMut<'_, String, AtomicU32> {
        self.active_counts.entry(application_id.to_string()).or_insert_with(|| AtomicU32::new(0))
    }

    pub fn active_count(&self, application_id: &str) -> u32 {
        self.active_counts
            .get(application_id)
            .map(|c| c.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    /// `§4.5` step 5: accept only if the application is chat-active and
    /// under capacity, incrementing the counter atomically with the check.
    /// Returns `false` (no increment performed) on rejection.
    pub fn try_accept(&self, application_id: &str) -> bool {
        let Some(settings) = self.get(application_id) else {
            return false;
        };
        if !settings.is_chat_active {
            return false;
        }
        let counter = self.counter(application_id);
        loop {
            let current = counter.load(Ordering::Acquire);
            if current >= settings.max_concurrent_online_users {
                return false;
            }
            if counter
                .compare_exchange(current, current + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return true;
            }
        }
    }

    pub fn release(&self, application_id: &str) {
        if let Some(counter) = self.active_counts.get(application_id) {
            counter.fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| Some(c.saturating_sub(1))).ok();
        }
    }

    /// Snapshot for `ManagerProtocol`'s `CONNECTED_USERS_INFO` (`§3.1`).
    pub fn connected_users_snapshot(&self) -> HashMap<String, u32> {
        self.active_counts
            .iter()
            .map(|e| (e.key().clone(), e.value().load(Ordering::Acquire)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(id: &str, active: bool, max: u32) -> ApplicationSettings {
        ApplicationSettings {
            identifier: id.into(),
            is_chat_active: active,
            max_concurrent_online_users: max,
            firebase_server_key: None,
        }
    }

    #[test]
    fn try_accept_rejects_inactive_applications() {
        let cache = ApplicationSettingsCache::new();
        cache.replace(vec![settings("app-1", false, 10)]);
        assert!(!cache.try_accept("app-1"));
    }

    #[test]
    fn try_accept_enforces_capacity_and_release_frees_a_slot() {
        let cache = ApplicationSettingsCache::new();
        cache.replace(vec![settings("app-1", true, 1)]);
        assert!(cache.try_accept("app-1"));
        assert!(!cache.try_accept("app-1"));
        cache.release("app-1");
        assert!(cache.try_accept("app-1"));
    }

    #[test]
    fn unknown_application_is_rejected() {
        let cache = ApplicationSettingsCache::new();
        assert!(!cache.try_accept("ghost"));
    }
}
