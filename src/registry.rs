//! Live connection registry and room broadcast fan-out
//!
//! The registry is the single piece of mutable shared state in the core:
//! a process-wide map from connection id to its outbound message handle
//! and the room it has joined. It is an explicitly owned object injected
//! through `AppState` so tests can instantiate isolated registries.

use dashmap::DashMap;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;

use crate::protocol::ServerMessage;

#[derive(Debug, Error, PartialEq)]
pub enum RegistryError {
    #[error("Connection not registered")]
    NotRegistered,
    #[error("Already joined a room")]
    AlreadyJoined,
}

/// In-memory state for one live connection
pub struct ConnectionEntry {
    pub sender: UnboundedSender<ServerMessage>,
    pub room_id: Option<i64>,
    pub remote_addr: Option<String>,
    pub user_agent: Option<String>,
    #[allow(dead_code)]
    pub connected_at: Instant,
}

/// Process-wide map of live connections, keyed by connection id
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: DashMap<String, ConnectionEntry>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
        }
    }

    /// Register a new physical connection. Must be called exactly once,
    /// before any message is processed for it.
    pub fn register(
        &self,
        connection_id: &str,
        sender: UnboundedSender<ServerMessage>,
        remote_addr: Option<String>,
        user_agent: Option<String>,
    ) {
        self.connections.insert(
            connection_id.to_string(),
            ConnectionEntry {
                sender,
                room_id: None,
                remote_addr,
                user_agent,
                connected_at: Instant::now(),
            },
        );
    }

    /// Assign a room to a connection. A connection may join exactly one
    /// room per lifetime; a second call is a protocol error.
    pub fn set_room(&self, connection_id: &str, room_id: i64) -> Result<(), RegistryError> {
        match self.connections.get_mut(connection_id) {
            Some(mut entry) => {
                if entry.room_id.is_some() {
                    return Err(RegistryError::AlreadyJoined);
                }
                entry.room_id = Some(room_id);
                Ok(())
            }
            None => Err(RegistryError::NotRegistered),
        }
    }

    /// Room the connection has joined, if any
    pub fn room_of(&self, connection_id: &str) -> Option<i64> {
        self.connections
            .get(connection_id)
            .and_then(|entry| entry.room_id)
    }

    /// Connection metadata captured at transport accept time
    pub fn meta_of(&self, connection_id: &str) -> Option<(Option<String>, Option<String>)> {
        self.connections
            .get(connection_id)
            .map(|entry| (entry.remote_addr.clone(), entry.user_agent.clone()))
    }

    /// Remove a connection. Returns `None` if it was never registered or
    /// was already removed (guards the `Closed` transition against double
    /// invocation); otherwise the inner option is the joined room, if any.
    pub fn unregister(&self, connection_id: &str) -> Option<Option<i64>> {
        self.connections
            .remove(connection_id)
            .map(|(_, entry)| entry.room_id)
    }

    /// Ids of connections in the room whose transport is still open
    pub fn connection_ids_in_room(&self, room_id: i64) -> Vec<String> {
        self.connections
            .iter()
            .filter(|entry| entry.room_id == Some(room_id) && !entry.sender.is_closed())
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Number of live connections (all rooms)
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Send to a single connection. Per-recipient result is ignored by
    /// design; a dead receiver is cleaned up by its own disconnect path.
    pub fn send_to(&self, connection_id: &str, message: ServerMessage) {
        if let Some(entry) = self.connections.get(connection_id) {
            let _ = entry.sender.send(message);
        }
    }

    /// Deliver an event to every open connection in the room at call time.
    /// Fire-and-forget per recipient: one failed send never blocks or
    /// fails delivery to the others.
    pub fn broadcast(&self, room_id: i64, message: ServerMessage) {
        for entry in self.connections.iter() {
            if entry.room_id == Some(room_id) && !entry.sender.is_closed() {
                let _ = entry.sender.send(message.clone());
            }
        }
    }

    /// Same as `broadcast`, excluding one connection (typically the sender)
    pub fn broadcast_except(&self, room_id: i64, except: &str, message: ServerMessage) {
        for entry in self.connections.iter() {
            if entry.room_id == Some(room_id)
                && entry.key() != except
                && !entry.sender.is_closed()
            {
                let _ = entry.sender.send(message.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn channel() -> (
        UnboundedSender<ServerMessage>,
        mpsc::UnboundedReceiver<ServerMessage>,
    ) {
        mpsc::unbounded_channel()
    }

    #[test]
    fn register_join_unregister_tracks_membership() {
        let registry = ConnectionRegistry::new();
        let (tx_a, _rx_a) = channel();
        let (tx_b, _rx_b) = channel();

        registry.register("a", tx_a, None, None);
        registry.register("b", tx_b, None, None);
        registry.set_room("a", 1).unwrap();
        registry.set_room("b", 1).unwrap();

        let mut ids = registry.connection_ids_in_room(1);
        ids.sort();
        assert_eq!(ids, vec!["a".to_string(), "b".to_string()]);

        assert_eq!(registry.unregister("a"), Some(Some(1)));
        assert_eq!(registry.connection_ids_in_room(1), vec!["b".to_string()]);

        // second removal is observable as a no-op
        assert_eq!(registry.unregister("a"), None);
    }

    #[test]
    fn set_room_is_idempotent_once() {
        let registry = ConnectionRegistry::new();
        let (tx, _rx) = channel();
        registry.register("a", tx, None, None);

        assert_eq!(registry.set_room("a", 1), Ok(()));
        assert_eq!(registry.set_room("a", 2), Err(RegistryError::AlreadyJoined));
        assert_eq!(registry.room_of("a"), Some(1));
    }

    #[test]
    fn set_room_requires_registration() {
        let registry = ConnectionRegistry::new();
        assert_eq!(registry.set_room("ghost", 1), Err(RegistryError::NotRegistered));
    }

    #[test]
    fn unregister_unjoined_is_room_noop() {
        let registry = ConnectionRegistry::new();
        let (tx, _rx) = channel();
        registry.register("a", tx, None, None);
        assert_eq!(registry.unregister("a"), Some(None));
    }

    #[test]
    fn closed_handles_are_excluded() {
        let registry = ConnectionRegistry::new();
        let (tx_a, rx_a) = channel();
        let (tx_b, _rx_b) = channel();
        registry.register("a", tx_a, None, None);
        registry.register("b", tx_b, None, None);
        registry.set_room("a", 1).unwrap();
        registry.set_room("b", 1).unwrap();

        drop(rx_a);
        assert_eq!(registry.connection_ids_in_room(1), vec!["b".to_string()]);
    }

    #[test]
    fn broadcast_reaches_room_members_only() {
        let registry = ConnectionRegistry::new();
        let (tx_a, mut rx_a) = channel();
        let (tx_b, mut rx_b) = channel();
        let (tx_c, mut rx_c) = channel();
        registry.register("a", tx_a, None, None);
        registry.register("b", tx_b, None, None);
        registry.register("c", tx_c, None, None);
        registry.set_room("a", 1).unwrap();
        registry.set_room("b", 1).unwrap();
        registry.set_room("c", 2).unwrap();

        registry.broadcast(
            1,
            ServerMessage::UserLeft {
                connection_id: "x".to_string(),
            },
        );

        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_ok());
        assert!(rx_c.try_recv().is_err());
    }

    #[test]
    fn broadcast_except_skips_the_sender() {
        let registry = ConnectionRegistry::new();
        let (tx_a, mut rx_a) = channel();
        let (tx_b, mut rx_b) = channel();
        registry.register("a", tx_a, None, None);
        registry.register("b", tx_b, None, None);
        registry.set_room("a", 1).unwrap();
        registry.set_room("b", 1).unwrap();

        registry.broadcast_except(
            1,
            "a",
            ServerMessage::UserLeft {
                connection_id: "a".to_string(),
            },
        );

        assert!(rx_a.try_recv().is_err());
        assert!(rx_b.try_recv().is_ok());
    }

    #[test]
    fn per_recipient_ordering_follows_invocation_order() {
        let registry = ConnectionRegistry::new();
        let (tx, mut rx) = channel();
        registry.register("a", tx, None, None);
        registry.set_room("a", 1).unwrap();

        for i in 0..5 {
            registry.broadcast(
                1,
                ServerMessage::UserLeft {
                    connection_id: format!("peer-{}", i),
                },
            );
        }

        for i in 0..5 {
            match rx.try_recv().unwrap() {
                ServerMessage::UserLeft { connection_id } => {
                    assert_eq!(connection_id, format!("peer-{}", i));
                }
                other => panic!("unexpected message: {:?}", other),
            }
        }
    }
}
