//! Connection registry.
//!
//! The single arena of live connections, keyed by the id the runtime assigned
//! at accept time. Readiness views (write interest, pending output) are
//! derived from it on demand rather than tracked separately, so they can never
//! drift from the connections themselves.

use std::{
    collections::HashMap,
    ops::Sub,
    time::{Duration, Instant},
};

use proton_core::Connection;

/// Registry of live connections.
///
/// Generic over `I` (Instant type) to support virtual time in tests.
#[derive(Debug)]
pub struct ConnectionRegistry<I = Instant>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
{
    /// Connection ID → connection state machine
    connections: HashMap<u64, Connection<I>>,
}

impl<I> Default for ConnectionRegistry<I>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
{
    fn default() -> Self {
        Self { connections: HashMap::new() }
    }
}

impl<I> ConnectionRegistry<I>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
{
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection.
    ///
    /// Returns `false` (and leaves the registry unchanged) if the id is
    /// already taken.
    pub fn insert(&mut self, connection_id: u64, connection: Connection<I>) -> bool {
        if self.connections.contains_key(&connection_id) {
            return false;
        }

        self.connections.insert(connection_id, connection);
        true
    }

    /// Remove a connection. Returns it if it existed.
    pub fn remove(&mut self, connection_id: u64) -> Option<Connection<I>> {
        self.connections.remove(&connection_id)
    }

    /// Connection by id. `None` if not registered.
    pub fn get(&self, connection_id: u64) -> Option<&Connection<I>> {
        self.connections.get(&connection_id)
    }

    /// Mutable connection by id. `None` if not registered.
    pub fn get_mut(&mut self, connection_id: u64) -> Option<&mut Connection<I>> {
        self.connections.get_mut(&connection_id)
    }

    /// Check if a connection is registered.
    pub fn contains(&self, connection_id: u64) -> bool {
        self.connections.contains_key(&connection_id)
    }

    /// Number of live connections.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Whether no connections are registered.
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// All connection ids, ascending.
    pub fn ids(&self) -> Vec<u64> {
        self.sorted_ids(|_| true)
    }

    /// Ids of connections registered for write, ascending.
    pub fn write_interested(&self) -> Vec<u64> {
        self.sorted_ids(Connection::registered_for_write)
    }

    /// Ids of connections with a queued or in-flight response, ascending.
    pub fn with_pending_output(&self) -> Vec<u64> {
        self.sorted_ids(Connection::has_pending_output)
    }

    fn sorted_ids(&self, keep: impl Fn(&Connection<I>) -> bool) -> Vec<u64> {
        let mut ids: Vec<u64> = self
            .connections
            .iter()
            .filter(|(_, connection)| keep(connection))
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use bytes::Bytes;

    use super::*;

    fn ready(now: Instant) -> Connection {
        let mut conn = Connection::new(SocketAddr::from(([127, 0, 0, 1], 9000)), now);
        conn.complete_handshake(Some("proton"), "proton").unwrap();
        conn
    }

    #[test]
    fn test_insert_and_remove() {
        let now = Instant::now();
        let mut registry = ConnectionRegistry::new();

        assert!(registry.insert(1, ready(now)));
        assert!(registry.contains(1));
        assert_eq!(registry.len(), 1);

        assert!(registry.remove(1).is_some());
        assert!(!registry.contains(1));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let now = Instant::now();
        let mut registry = ConnectionRegistry::new();

        assert!(registry.insert(7, ready(now)));
        assert!(!registry.insert(7, ready(now)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_readiness_views_follow_connections() {
        let now = Instant::now();
        let mut registry = ConnectionRegistry::new();
        for id in [3, 1, 2] {
            registry.insert(id, ready(now));
        }

        registry.get_mut(3).unwrap().enqueue(Bytes::from_static(b"x\r\n")).unwrap();
        registry.get_mut(1).unwrap().enqueue(Bytes::from_static(b"y\r\n")).unwrap();

        assert_eq!(registry.write_interested(), vec![1, 3]);
        assert_eq!(registry.with_pending_output(), vec![1, 3]);

        // In flight: no longer queued, still pending
        let conn = registry.get_mut(1).unwrap();
        conn.pop_outbound().unwrap();
        assert_eq!(registry.with_pending_output(), vec![1, 3]);

        registry.get_mut(1).unwrap().write_completed();
        assert_eq!(registry.write_interested(), vec![3]);
        assert_eq!(registry.with_pending_output(), vec![3]);
        assert_eq!(registry.ids(), vec![1, 2, 3]);
    }
}
