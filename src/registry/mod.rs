//! Index from user identity to live connection ids
//!
//! The registry only stores [`ConnectionId`]s. The connections themselves
//! are owned by the gateway's connection table and resolved at send time, so
//! there is no ownership cycle between a connection and its registry slot.
//!
//! # Concurrency
//!
//! Backed by a sharded [`DashMap`]: register/unregister/lookup for one user
//! lock only that user's shard. Removal of the last connection and removal
//! of the user key happen under the same entry lock, so a user is never
//! observed with an empty set.

use crate::core::identity::{ConnectionId, UserIdentity};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use indexmap::IndexSet;

/// Concurrent `UserIdentity → {ConnectionId}` index
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    users: DashMap<UserIdentity, IndexSet<ConnectionId>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection for `user`
    ///
    /// Returns `false` when the connection was already registered; the set
    /// is left unchanged so delivery is never duplicated.
    pub fn register(&self, user: &UserIdentity, connection: ConnectionId) -> bool {
        let inserted = self
            .users
            .entry(user.clone())
            .or_default()
            .insert(connection.clone());

        if inserted {
            tracing::debug!(user_id = %user, connection_id = %connection, "Connection registered");
        }
        inserted
    }

    /// Remove a connection for `user`, dropping the user when none remain
    ///
    /// Unknown users or connections are a no-op returning `false`.
    pub fn unregister(&self, user: &UserIdentity, connection: &ConnectionId) -> bool {
        match self.users.entry(user.clone()) {
            Entry::Occupied(mut entry) => {
                let removed = entry.get_mut().shift_remove(connection);
                if entry.get().is_empty() {
                    entry.remove();
                }
                if removed {
                    tracing::debug!(user_id = %user, connection_id = %connection, "Connection unregistered");
                }
                removed
            }
            Entry::Vacant(_) => false,
        }
    }

    /// Snapshot of the user's connections, in registration order
    pub fn lookup(&self, user: &UserIdentity) -> Vec<ConnectionId> {
        self.users
            .get(user)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn contains_user(&self, user: &UserIdentity) -> bool {
        self.users.contains_key(user)
    }

    /// Number of users with at least one connection
    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    /// Total registered connections across all users
    pub fn connection_count(&self) -> usize {
        self.users.iter().map(|entry| entry.value().len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, HashSet};
    use std::sync::Arc;

    fn user(id: &str) -> UserIdentity {
        UserIdentity::new(id).unwrap()
    }

    fn conn(id: &str) -> ConnectionId {
        ConnectionId::from(id)
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = ConnectionRegistry::new();
        let u = user("U101");

        assert!(registry.register(&u, conn("U101-1")));
        assert!(registry.register(&u, conn("U101-2")));

        assert_eq!(registry.lookup(&u), vec![conn("U101-1"), conn("U101-2")]);
        assert_eq!(registry.user_count(), 1);
        assert_eq!(registry.connection_count(), 2);
    }

    #[test]
    fn test_register_is_idempotent() {
        let registry = ConnectionRegistry::new();
        let u = user("U1");

        assert!(registry.register(&u, conn("U1-1")));
        assert!(!registry.register(&u, conn("U1-1")));
        assert_eq!(registry.lookup(&u).len(), 1);
    }

    #[test]
    fn test_last_unregister_removes_user() {
        let registry = ConnectionRegistry::new();
        let u = user("U1");
        registry.register(&u, conn("U1-1"));
        registry.register(&u, conn("U1-2"));

        assert!(registry.unregister(&u, &conn("U1-1")));
        assert!(registry.contains_user(&u));

        assert!(registry.unregister(&u, &conn("U1-2")));
        assert!(!registry.contains_user(&u));
        assert_eq!(registry.user_count(), 0);
        assert!(registry.lookup(&u).is_empty());
    }

    #[test]
    fn test_unregister_absent_is_noop() {
        let registry = ConnectionRegistry::new();
        let u = user("U1");

        assert!(!registry.unregister(&u, &conn("U1-1")));

        registry.register(&u, conn("U1-1"));
        assert!(!registry.unregister(&u, &conn("U1-99")));
        assert!(registry.unregister(&u, &conn("U1-1")));
        assert!(!registry.unregister(&u, &conn("U1-1")));
        assert!(!registry.contains_user(&u));
    }

    #[test]
    fn test_lookup_is_a_snapshot() {
        let registry = ConnectionRegistry::new();
        let u = user("U1");
        registry.register(&u, conn("U1-1"));

        let snapshot = registry.lookup(&u);
        registry.register(&u, conn("U1-2"));
        registry.unregister(&u, &conn("U1-1"));

        assert_eq!(snapshot, vec![conn("U1-1")]);
        assert_eq!(registry.lookup(&u), vec![conn("U1-2")]);
    }

    /// Replays a deterministic op sequence against a model and checks the
    /// registry after every step.
    #[test]
    fn test_matches_model_over_op_sequence() {
        let registry = ConnectionRegistry::new();
        let mut model: HashMap<String, HashSet<String>> = HashMap::new();

        let users = ["A", "B", "C"];
        let mut seed: u64 = 0x5eed;
        for step in 0..500 {
            // xorshift, good enough for an op mix
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;

            let u = users[(seed % 3) as usize];
            let c = format!("{}-{}", u, (seed >> 8) % 4);
            let uid = user(u);

            if (seed >> 16) % 3 == 0 {
                registry.unregister(&uid, &conn(&c));
                if let Some(set) = model.get_mut(u) {
                    set.remove(&c);
                    if set.is_empty() {
                        model.remove(u);
                    }
                }
            } else {
                registry.register(&uid, conn(&c));
                model.entry(u.to_string()).or_default().insert(c);
            }

            for u in users {
                let actual: HashSet<String> = registry
                    .lookup(&user(u))
                    .iter()
                    .map(|c| c.as_str().to_string())
                    .collect();
                let expected = model.get(u).cloned().unwrap_or_default();
                assert_eq!(actual, expected, "mismatch for {} at step {}", u, step);
                assert_eq!(registry.contains_user(&user(u)), model.contains_key(u));
            }
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_register_unregister() {
        let registry = Arc::new(ConnectionRegistry::new());

        let tasks: Vec<_> = (0..16)
            .map(|task| {
                let registry = registry.clone();
                tokio::spawn(async move {
                    let u = user(&format!("U{}", task % 4));
                    for i in 0..200 {
                        let c = conn(&format!("{}-{}-{}", u, task, i));
                        registry.register(&u, c.clone());
                        let _ = registry.lookup(&u);
                        assert!(registry.unregister(&u, &c));
                    }
                })
            })
            .collect();

        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(registry.user_count(), 0);
        assert_eq!(registry.connection_count(), 0);
    }
}
