//! WebSocket connection registry.
//!
//! Tracks every connected client and fans server messages out to all of
//! them. Senders that went away are pruned on the next broadcast.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use tokio::sync::mpsc;
use tracing::debug;

use super::messages::ServerMessage;

#[derive(Default)]
pub struct ConnectionManager {
    next_id: AtomicUsize,
    connections: Mutex<HashMap<usize, mpsc::UnboundedSender<ServerMessage>>>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new client; returns its connection id.
    pub fn register(&self, tx: mpsc::UnboundedSender<ServerMessage>) -> usize {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.connections.lock().unwrap().insert(id, tx);
        debug!(connection = id, "websocket client registered");
        id
    }

    pub fn unregister(&self, id: usize) {
        self.connections.lock().unwrap().remove(&id);
        debug!(connection = id, "websocket client unregistered");
    }

    /// Send a message to every connected client. Returns how many clients
    /// received it.
    pub fn broadcast(&self, message: ServerMessage) -> usize {
        let mut connections = self.connections.lock().unwrap();
        let mut stale = Vec::new();
        let mut delivered = 0;
        for (id, tx) in connections.iter() {
            if tx.send(message.clone()).is_err() {
                stale.push(*id);
            } else {
                delivered += 1;
            }
        }
        for id in stale {
            connections.remove(&id);
        }
        delivered
    }

    pub fn connection_count(&self) -> usize {
        self.connections.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_register_broadcast_unregister() {
        let manager = ConnectionManager::new();
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();

        let id1 = manager.register(tx1);
        let _id2 = manager.register(tx2);
        assert_eq!(manager.connection_count(), 2);

        let delivered = manager.broadcast(ServerMessage::empty("ping"));
        assert_eq!(delivered, 2);
        assert_eq!(rx1.recv().await.unwrap().msg_type, "ping");
        assert_eq!(rx2.recv().await.unwrap().msg_type, "ping");

        manager.unregister(id1);
        assert_eq!(manager.connection_count(), 1);
    }

    #[test]
    fn test_broadcast_prunes_dead_connections() {
        let manager = ConnectionManager::new();
        let (tx, rx) = mpsc::unbounded_channel();
        manager.register(tx);
        drop(rx);

        let delivered = manager.broadcast(ServerMessage::empty("ping"));
        assert_eq!(delivered, 0);
        assert_eq!(manager.connection_count(), 0);
    }
}
