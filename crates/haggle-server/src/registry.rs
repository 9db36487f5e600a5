//! Process-wide map of user id to their single active connection.

use std::sync::Arc;

use dashmap::DashMap;
use haggle_core::{ConnectionId, UserId};
use metrics::counter;
use tracing::info;

use crate::connection::Connection;
use crate::metrics::WS_SUPERSEDED_TOTAL;

/// Registry of live chat connections.
///
/// At most one connection per user: registering again replaces the previous
/// entry and closes the replaced connection's queue.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: DashMap<UserId, Arc<Connection>>,
}

impl ConnectionRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `connection` the active connection for `user_id`.
    ///
    /// Returns the connection it replaced, already closed.
    pub fn register(&self, user_id: UserId, connection: Arc<Connection>) -> Option<Arc<Connection>> {
        let previous = self.connections.insert(user_id, connection)?;
        let _ = previous.close();
        counter!(WS_SUPERSEDED_TOTAL).increment(1);
        info!(
            user_id = %previous.user_id(),
            connection_id = %previous.id(),
            "connection superseded by a newer one"
        );
        Some(previous)
    }

    /// Remove whatever connection is registered for `user_id`.
    pub fn unregister(&self, user_id: &UserId) -> Option<Arc<Connection>> {
        self.connections.remove(user_id).map(|(_, conn)| conn)
    }

    /// Remove the entry for `user_id` only if it is still `connection_id`.
    ///
    /// A superseded connection uses this on its way out so it cannot evict
    /// its replacement.
    pub fn remove_if_current(&self, user_id: &UserId, connection_id: &ConnectionId) -> bool {
        self.connections
            .remove_if(user_id, |_, conn| conn.id() == connection_id)
            .is_some()
    }

    /// Active connection for `user_id`; `None` means offline.
    pub fn lookup(&self, user_id: &UserId) -> Option<Arc<Connection>> {
        self.connections.get(user_id).map(|entry| Arc::clone(entry.value()))
    }

    /// Number of registered users.
    pub fn count(&self) -> usize {
        self.connections.len()
    }

    /// Close every connection's queue so the write pumps send close frames.
    ///
    /// Entries are removed by each session as it winds down.
    pub fn close_all(&self) -> usize {
        let connections: Vec<Arc<Connection>> = self
            .connections
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        connections.iter().filter(|conn| conn.close()).count()
    }
}

#[cfg(test)]
mod tests {
    use haggle_core::backoff::RetryPolicy;
    use tokio::sync::mpsc;

    use super::*;

    fn connect(user: &str) -> (Arc<Connection>, mpsc::Receiver<haggle_core::ChatMessage>) {
        Connection::new(UserId::from(user), 8, RetryPolicy::default())
    }

    #[test]
    fn register_then_lookup() {
        let registry = ConnectionRegistry::new();
        let (alice, _rx) = connect("alice");
        assert!(registry.register(UserId::from("alice"), alice.clone()).is_none());

        let found = registry.lookup(&UserId::from("alice")).unwrap();
        assert!(Arc::ptr_eq(&found, &alice));
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn lookup_unknown_is_none() {
        let registry = ConnectionRegistry::new();
        assert!(registry.lookup(&UserId::from("ghost")).is_none());
    }

    #[test]
    fn register_overwrites_and_closes_previous() {
        let registry = ConnectionRegistry::new();
        let (first, _rx1) = connect("alice");
        let (second, _rx2) = connect("alice");
        let _ = registry.register(UserId::from("alice"), first.clone());

        let replaced = registry.register(UserId::from("alice"), second.clone()).unwrap();
        assert!(Arc::ptr_eq(&replaced, &first));
        assert!(first.is_closed());
        assert!(!second.is_closed());

        let found = registry.lookup(&UserId::from("alice")).unwrap();
        assert!(Arc::ptr_eq(&found, &second));
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn unregister_removes() {
        let registry = ConnectionRegistry::new();
        let (alice, _rx) = connect("alice");
        let _ = registry.register(UserId::from("alice"), alice);
        assert!(registry.unregister(&UserId::from("alice")).is_some());
        assert!(registry.lookup(&UserId::from("alice")).is_none());
        assert!(registry.unregister(&UserId::from("alice")).is_none());
    }

    #[test]
    fn superseded_connection_cannot_evict_replacement() {
        let registry = ConnectionRegistry::new();
        let (first, _rx1) = connect("alice");
        let (second, _rx2) = connect("alice");
        let _ = registry.register(UserId::from("alice"), first.clone());
        let _ = registry.register(UserId::from("alice"), second.clone());

        assert!(!registry.remove_if_current(&UserId::from("alice"), first.id()));
        assert!(registry.lookup(&UserId::from("alice")).is_some());

        assert!(registry.remove_if_current(&UserId::from("alice"), second.id()));
        assert!(registry.lookup(&UserId::from("alice")).is_none());
    }

    #[test]
    fn close_all_closes_every_queue() {
        let registry = ConnectionRegistry::new();
        let (alice, _rx1) = connect("alice");
        let (bob, _rx2) = connect("bob");
        let _ = registry.register(UserId::from("alice"), alice.clone());
        let _ = registry.register(UserId::from("bob"), bob.clone());

        assert_eq!(registry.close_all(), 2);
        assert!(alice.is_closed());
        assert!(bob.is_closed());
        assert_eq!(registry.close_all(), 0);
    }
}
