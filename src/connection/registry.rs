//! Registry of live connections.
//!
//! `ConnectionRegistry` stores non-owning weak references so the registry
//! never keeps a torn-down connection alive. The external idle scanner
//! queries it with [`ConnectionRegistry::idle_connections`].

use std::{
    sync::{Arc, Weak},
    time::{Duration, Instant},
};

use dashmap::DashMap;

use super::{Connection, ConnectionId};

/// Concurrent registry of connections keyed by [`ConnectionId`].
#[derive(Default)]
pub struct ConnectionRegistry(DashMap<ConnectionId, Weak<Connection>>);

impl ConnectionRegistry {
    /// Retrieve a connection if it is still alive.
    pub fn get(&self, id: &ConnectionId) -> Option<Arc<Connection>> {
        let guard = self.0.get(id);
        let conn = guard.as_ref().and_then(|weak| weak.upgrade());
        drop(guard);
        if conn.is_none() {
            self.0.remove_if(id, |_, weak| weak.strong_count() == 0);
        }
        conn
    }

    /// Register a newly accepted connection.
    pub fn insert(&self, conn: &Arc<Connection>) { self.0.insert(conn.id(), Arc::downgrade(conn)); }

    /// Remove a connection, typically on teardown.
    pub fn remove(&self, id: &ConnectionId) { self.0.remove(id); }

    /// Drop entries whose connection has been deallocated.
    pub fn prune(&self) { self.0.retain(|_, weak| weak.strong_count() > 0); }

    /// Number of registered entries, including stale ones not yet pruned.
    #[must_use]
    pub fn len(&self) -> usize { self.0.len() }

    /// Whether the registry has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.0.is_empty() }

    /// Live connections idle for at least `max_idle`.
    #[must_use]
    pub fn idle_connections(&self, max_idle: Duration) -> Vec<Arc<Connection>> {
        self.idle_connections_at(Instant::now(), max_idle)
    }

    /// Live connections idle for at least `max_idle` as of `now`.
    ///
    /// Stale entries are pruned while iterating.
    #[must_use]
    pub fn idle_connections_at(&self, now: Instant, max_idle: Duration) -> Vec<Arc<Connection>> {
        let mut idle = Vec::new();
        self.0.retain(|_, weak| {
            let Some(conn) = weak.upgrade() else {
                return false;
            };
            if !conn.is_closed() && conn.idle_for_at(now) >= max_idle {
                idle.push(conn);
            }
            true
        });
        idle
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dropped_connections_are_pruned_on_lookup() {
        let registry = ConnectionRegistry::default();
        let conn = Connection::detached();
        let id = conn.id();
        registry.insert(&conn);
        assert!(registry.get(&id).is_some());
        drop(conn);
        assert!(registry.get(&id).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn idle_scan_reports_only_stale_connections() {
        let registry = ConnectionRegistry::default();
        let quiet = Connection::detached();
        let busy = Connection::detached();
        registry.insert(&quiet);
        registry.insert(&busy);

        let later = Instant::now() + Duration::from_secs(60);
        busy.touch_at(later);

        let idle = registry.idle_connections_at(later, Duration::from_secs(30));
        assert_eq!(idle.len(), 1);
        assert_eq!(idle[0].id(), quiet.id());
    }

    #[test]
    fn closed_connections_are_not_reported_idle() {
        let registry = ConnectionRegistry::default();
        let conn = Connection::detached();
        registry.insert(&conn);
        conn.mark_closed();
        let later = Instant::now() + Duration::from_secs(60);
        assert!(registry.idle_connections_at(later, Duration::ZERO).is_empty());
    }
}
