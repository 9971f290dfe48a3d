//! `UserLocator` (`§3`, `§4.3`): `app_user_id → set<edge_id>` at the CR.
//!
//! Every mutation that can empty a value set is implemented as a single
//! atomic dashmap `Entry` operation end to end (lookup, mutate, and the
//! conditional removal all under one shard lock) rather than a separate
//! "check empty" followed by a second, unguarded index — `§9` calls out the
//! latter as an observed defect class in the source system.

use std::collections::HashSet;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

/// The CR's `app_user_id → set<edge_id>` directory.
#[derive(Default)]
pub struct UserLocator {
    owners: DashMap<String, HashSet<String>>,
}

impl UserLocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// `ADD_APP_USER_WEBSOCKET` / one id of `FULL_SYNC` (`§4.3`): add
    /// `edge_id` to `owners[app_user_id]`, creating the entry if absent.
    pub fn add(&self, app_user_id: &str, edge_id: &str) {
        self.owners
            .entry(app_user_id.to_string())
            .or_default()
            .insert(edge_id.to_string());
    }

    /// `REMOVE_APP_USER_WEBSOCKET` (`§4.3`): remove `edge_id`; if the set
    /// becomes empty, delete the key. Single atomic entry operation.
    pub fn remove(&self, app_user_id: &str, edge_id: &str) {
        if let Entry::Occupied(mut entry) = self.owners.entry(app_user_id.to_string()) {
            entry.get_mut().remove(edge_id);
            if entry.get().is_empty() {
                entry.remove();
            }
        }
    }

    /// Disconnect cascade (`§4.2`): remove `edge_id` from every value set,
    /// deleting any key that becomes empty as a result. Returns the number
    /// of user entries this edge was removed from (for logging).
    pub fn remove_edge_everywhere(&self, edge_id: &str) -> usize {
        let mut removed_from = 0usize;
        let mut emptied = Vec::new();
        for mut entry in self.owners.iter_mut() {
            if entry.value_mut().remove(edge_id) {
                removed_from += 1;
                if entry.value().is_empty() {
                    emptied.push(entry.key().clone());
                }
            }
        }
        for key in emptied {
            self.owners.remove_if(&key, |_, v| v.is_empty());
        }
        removed_from
    }

    /// `§4.3`: for each recipient, collect the union of owning edge ids;
    /// recipients with no owning edge are returned separately as "offline".
    pub fn owners_for(&self, app_user_identifiers: &[String]) -> (HashSet<String>, Vec<String>) {
        let mut owners = HashSet::new();
        let mut offline = Vec::new();
        for id in app_user_identifiers {
            match self.owners.get(id) {
                Some(set) if !set.is_empty() => owners.extend(set.iter().cloned()),
                _ => offline.push(id.clone()),
            }
        }
        (owners, offline)
    }

    pub fn contains(&self, app_user_id: &str) -> bool {
        self.owners.get(app_user_id).is_some_and(|s| !s.is_empty())
    }

    pub fn owner_count(&self, app_user_id: &str) -> usize {
        self.owners.get(app_user_id).map(|s| s.len()).unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_then_remove_drops_the_key_once_the_last_owner_leaves() {
        let locator = UserLocator::new();
        locator.add("u1", "e1");
        assert!(locator.contains("u1"));
        locator.remove("u1", "e1");
        assert!(!locator.contains("u1"));
        assert!(locator.is_empty());
    }

    #[test]
    fn remove_is_a_no_op_when_the_key_is_already_gone() {
        let locator = UserLocator::new();
        locator.remove("ghost", "e1");
        assert!(locator.is_empty());
    }

    #[test]
    fn full_sync_does_not_clear_existing_owners_from_other_edges() {
        let locator = UserLocator::new();
        locator.add("u1", "e1");
        locator.add("u1", "e2");
        assert_eq!(locator.owner_count("u1"), 2);
    }

    #[test]
    fn disconnect_cascade_removes_the_edge_from_every_entry_and_drops_emptied_keys() {
        let locator = UserLocator::new();
        locator.add("u1", "e1");
        locator.add("u2", "e1");
        locator.add("u2", "e2");
        let removed = locator.remove_edge_everywhere("e1");
        assert_eq!(removed, 2);
        assert!(!locator.contains("u1"));
        assert!(locator.contains("u2"));
        assert_eq!(locator.owner_count("u2"), 1);
    }

    #[test]
    fn owners_for_splits_known_and_offline_recipients() {
        let locator = UserLocator::new();
        locator.add("u1", "e1");
        locator.add("u2", "e2");
        let (owners, offline) = locator.owners_for(&["u1".into(), "u2".into(), "u3".into()]);
        assert_eq!(owners.len(), 2);
        assert_eq!(offline, vec!["u3".to_string()]);
    }

    #[test]
    fn invariant_value_sets_are_never_left_empty_in_the_map() {
        let locator = UserLocator::new();
        locator.add("u1", "e1");
        locator.remove("u1", "e1");
        // The entry must be gone entirely, not present-with-empty-set.
        assert_eq!(locator.owner_count("u1"), 0);
        assert_eq!(locator.len(), 0);
    }
}
