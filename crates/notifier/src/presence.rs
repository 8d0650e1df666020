//! Connection presence registry.
//!
//! Tracks which users currently hold a live realtime connection as a
//! bidirectional `user_id ↔ connection_id` map. Process-local, like the
//! timer registry: every instance sees only its own connections, and the
//! realtime gateway's clustering handles cross-instance reach.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;

/// A live connection for one user.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceEntry {
    pub user_id: String,
    pub connection_id: String,
    pub connected_at: DateTime<Utc>,
}

#[derive(Default)]
struct PresenceMaps {
    by_user: HashMap<String, PresenceEntry>,
    by_connection: HashMap<String, String>,
}

/// Process-local presence registry with upsert/delete by either key.
#[derive(Default)]
pub struct PresenceRegistry {
    maps: RwLock<PresenceMaps>,
}

impl PresenceRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a connection for a user, replacing any previous connection.
    pub fn connect(&self, user_id: &str, connection_id: &str) -> PresenceEntry {
        let entry = PresenceEntry {
            user_id: user_id.to_string(),
            connection_id: connection_id.to_string(),
            connected_at: Utc::now(),
        };

        let mut maps = self.maps.write().unwrap();
        if let Some(previous) = maps.by_user.insert(user_id.to_string(), entry.clone()) {
            maps.by_connection.remove(&previous.connection_id);
        }
        if let Some(previous_user) = maps
            .by_connection
            .insert(connection_id.to_string(), user_id.to_string())
        {
            if previous_user != user_id {
                maps.by_user.remove(&previous_user);
            }
        }

        tracing::debug!(user_id, connection_id, "User connected");
        entry
    }

    /// Remove a user's connection. Returns true if one was present.
    pub fn disconnect_user(&self, user_id: &str) -> bool {
        let mut maps = self.maps.write().unwrap();
        match maps.by_user.remove(user_id) {
            Some(entry) => {
                maps.by_connection.remove(&entry.connection_id);
                tracing::debug!(user_id, "User disconnected");
                true
            }
            None => false,
        }
    }

    /// Remove by connection id (the disconnect path only knows the
    /// connection). Returns the user it belonged to, if any.
    pub fn disconnect_connection(&self, connection_id: &str) -> Option<String> {
        let mut maps = self.maps.write().unwrap();
        let user_id = maps.by_connection.remove(connection_id)?;
        maps.by_user.remove(&user_id);
        tracing::debug!(connection_id, user_id, "Connection dropped");
        Some(user_id)
    }

    pub fn connection_for(&self, user_id: &str) -> Option<String> {
        self.maps
            .read()
            .unwrap()
            .by_user
            .get(user_id)
            .map(|entry| entry.connection_id.clone())
    }

    pub fn is_active(&self, user_id: &str) -> bool {
        self.maps.read().unwrap().by_user.contains_key(user_id)
    }

    pub fn all(&self) -> Vec<PresenceEntry> {
        self.maps.read().unwrap().by_user.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.maps.read().unwrap().by_user.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry (graceful shutdown).
    pub fn clear(&self) {
        let mut maps = self.maps.write().unwrap();
        maps.by_user.clear();
        maps.by_connection.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_and_lookup() {
        let registry = PresenceRegistry::new();
        registry.connect("u-1", "c-1");

        assert!(registry.is_active("u-1"));
        assert_eq!(registry.connection_for("u-1").as_deref(), Some("c-1"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_reconnect_replaces_previous_connection() {
        let registry = PresenceRegistry::new();
        registry.connect("u-1", "c-1");
        registry.connect("u-1", "c-2");

        assert_eq!(registry.connection_for("u-1").as_deref(), Some("c-2"));
        // The stale connection no longer resolves to the user
        assert_eq!(registry.disconnect_connection("c-1"), None);
        assert!(registry.is_active("u-1"));
    }

    #[test]
    fn test_disconnect_by_connection() {
        let registry = PresenceRegistry::new();
        registry.connect("u-1", "c-1");

        assert_eq!(registry.disconnect_connection("c-1").as_deref(), Some("u-1"));
        assert!(!registry.is_active("u-1"));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_disconnect_user_removes_both_sides() {
        let registry = PresenceRegistry::new();
        registry.connect("u-1", "c-1");

        assert!(registry.disconnect_user("u-1"));
        assert!(!registry.disconnect_user("u-1"));
        assert_eq!(registry.disconnect_connection("c-1"), None);
    }

    #[test]
    fn test_clear_empties_registry() {
        let registry = PresenceRegistry::new();
        registry.connect("u-1", "c-1");
        registry.connect("u-2", "c-2");

        registry.clear();
        assert!(registry.is_empty());
        assert!(registry.all().is_empty());
    }
}
