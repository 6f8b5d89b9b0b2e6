//! Latest event per RAS account.
//!
//! Epistemic foundation:
//! - K_i: A user's last event only ever moves forward in time
//! - K_i: Every applied event marks the user dirty until it is uploaded
//! - B_i: Upload may fail → dirty users are kept for the next pass

use crate::models::{ReportEvent, User};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Users keyed by account ID, with the set awaiting upload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserRegistry {
    users: HashMap<i64, User>,
    #[serde(default)]
    dirty: BTreeSet<i64>,
}

impl UserRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one report event into the registry.
    ///
    /// Returns the user when the event became their last event. Ignored
    /// event types and events not strictly newer than the current one
    /// return None.
    pub fn observe(&mut self, event: &ReportEvent) -> Option<&User> {
        let last_event = event.to_last_event()?;

        match self.users.get_mut(&event.account_id) {
            Some(user) => {
                if user.last_event.timestamp >= last_event.timestamp {
                    return None;
                }
                user.last_event = last_event;
            }
            None => {
                self.users.insert(
                    event.account_id,
                    User {
                        id: event.account_id,
                        name: event.account_name.clone(),
                        last_event,
                    },
                );
            }
        }

        self.dirty.insert(event.account_id);
        self.users.get(&event.account_id)
    }

    pub fn get(&self, id: i64) -> Option<&User> {
        self.users.get(&id)
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    /// Users changed since their last upload, ordered by ID.
    pub fn pending_updates(&self) -> Vec<User> {
        self.dirty
            .iter()
            .filter_map(|id| self.users.get(id))
            .cloned()
            .collect()
    }

    pub fn pending_count(&self) -> usize {
        self.dirty.len()
    }

    /// Clear the dirty flag of uploaded users.
    pub fn mark_uploaded<'a>(&mut self, ids: impl IntoIterator<Item = &'a i64>) {
        for id in ids {
            self.dirty.remove(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EventType, parse_xs_datetime};

    fn event(account_id: i64, kind: &str, time: &str, workstation: &str) -> ReportEvent {
        ReportEvent {
            event_type: kind.to_string(),
            event_time: parse_xs_datetime(time).unwrap(),
            workstation: workstation.to_string(),
            additional_info: String::new(),
            account_id,
            account_name: format!("User {account_id}"),
        }
    }

    #[test]
    fn test_first_event_inserts_user() {
        let mut registry = UserRegistry::new();
        let user = registry
            .observe(&event(1, "Edit", "2024-05-01T10:00:00Z", "WS1"))
            .unwrap();
        assert_eq!(user.name, "User 1");
        assert_eq!(user.last_event.event_type, EventType::Edit);
        assert_eq!(registry.pending_count(), 1);
    }

    #[test]
    fn test_only_strictly_newer_events_replace() {
        let mut registry = UserRegistry::new();
        registry.observe(&event(1, "Edit", "2024-05-01T10:00:00Z", "WS1"));

        assert!(registry.observe(&event(1, "Sign", "2024-05-01T09:00:00Z", "WS2")).is_none());
        assert!(registry.observe(&event(1, "Sign", "2024-05-01T10:00:00Z", "WS2")).is_none());
        assert_eq!(registry.get(1).unwrap().last_event.workstation, "WS1");

        let user = registry
            .observe(&event(1, "Sign", "2024-05-01T11:00:00Z", "WS3"))
            .unwrap();
        assert_eq!(user.last_event.event_type, EventType::Sign);
        assert_eq!(user.last_event.workstation, "WS3");
    }

    #[test]
    fn test_offsets_compare_as_instants() {
        let mut registry = UserRegistry::new();
        registry.observe(&event(1, "Edit", "2024-05-01T10:00:00+12:00", "WS1"));
        // 23:00 UTC on 30 April is 11:00 in +12:00, so this is newer
        assert!(registry.observe(&event(1, "Sign", "2024-04-30T23:00:00Z", "WS2")).is_some());
    }

    #[test]
    fn test_ignored_event_types() {
        let mut registry = UserRegistry::new();
        assert!(registry.observe(&event(1, "View", "2024-05-01T10:00:00Z", "WS1")).is_none());
        assert!(registry.is_empty());
        assert_eq!(registry.pending_count(), 0);
    }

    #[test]
    fn test_dirty_users_survive_until_uploaded() {
        let mut registry = UserRegistry::new();
        registry.observe(&event(2, "Sign", "2024-05-01T10:00:00Z", "WS1"));
        registry.observe(&event(1, "Overread", "2024-05-01T10:00:00Z", "WS1"));

        let pending = registry.pending_updates();
        assert_eq!(pending.iter().map(|u| u.id).collect::<Vec<_>>(), vec![1, 2]);

        registry.mark_uploaded(&[1]);
        assert_eq!(registry.pending_count(), 1);
        assert_eq!(registry.pending_updates()[0].id, 2);
        assert_eq!(registry.len(), 2);
    }
}
