//! Per-connection outbound message registry
//!
//! Each registered connection owns a bounded outbox channel; the embedding
//! server drains the receiver onto the real delivery channel. Sends never
//! block the control path: a full or closed outbox logs and drops, since
//! message delivery to a dead peer is not this component's problem.

use std::collections::HashMap;

use tokio::sync::{mpsc, RwLock};

use crate::registry::ConnId;

use super::message::ServerMessage;

/// Registry of outbound channels, one per live connection
#[derive(Default)]
pub struct OutboxRegistry {
    inner: RwLock<HashMap<ConnId, mpsc::Sender<ServerMessage>>>,
}

impl OutboxRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the outbox for a new connection
    pub async fn register(&self, conn: ConnId, tx: mpsc::Sender<ServerMessage>) {
        self.inner.write().await.insert(conn, tx);
    }

    /// Remove the outbox for a disconnected connection
    pub async fn remove(&self, conn: ConnId) {
        self.inner.write().await.remove(&conn);
    }

    /// Queue a message for a connection
    ///
    /// Returns whether the message was accepted. Unknown targets and full
    /// outboxes are logged and dropped.
    pub async fn send(&self, conn: ConnId, msg: ServerMessage) -> bool {
        let tx = {
            let guard = self.inner.read().await;
            guard.get(&conn).cloned()
        };

        let Some(tx) = tx else {
            tracing::debug!(conn = %conn, message = msg.name(), "Dropping message for unknown connection");
            return false;
        };

        if let Err(err) = tx.try_send(msg) {
            let msg = match &err {
                mpsc::error::TrySendError::Full(m) | mpsc::error::TrySendError::Closed(m) => m,
            };
            tracing::warn!(
                conn = %conn,
                message = msg.name(),
                "Failed to queue outbound signaling message"
            );
            return false;
        }
        true
    }

    /// Number of registered outboxes
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::SourceId;

    fn conn(n: u64) -> ConnId {
        ConnId(n)
    }

    fn ended(source: &str) -> ServerMessage {
        ServerMessage::SourceEnded {
            source_id: SourceId::new(source),
        }
    }

    #[tokio::test]
    async fn test_send_reaches_registered_outbox() {
        let outboxes = OutboxRegistry::new();
        let (tx, mut rx) = mpsc::channel(4);

        outboxes.register(conn(1), tx).await;
        assert!(outboxes.send(conn(1), ended("s1")).await);
        assert!(matches!(rx.recv().await, Some(ServerMessage::SourceEnded { .. })));
    }

    #[tokio::test]
    async fn test_send_to_unknown_connection_is_dropped() {
        let outboxes = OutboxRegistry::new();
        assert!(!outboxes.send(conn(9), ended("s1")).await);
    }

    #[tokio::test]
    async fn test_full_outbox_drops_instead_of_blocking() {
        let outboxes = OutboxRegistry::new();
        let (tx, _rx) = mpsc::channel(1);

        outboxes.register(conn(1), tx).await;
        assert!(outboxes.send(conn(1), ended("s1")).await);
        assert!(!outboxes.send(conn(1), ended("s1")).await);
    }

    #[tokio::test]
    async fn test_remove_unregisters() {
        let outboxes = OutboxRegistry::new();
        let (tx, _rx) = mpsc::channel(4);

        outboxes.register(conn(1), tx).await;
        outboxes.remove(conn(1)).await;
        assert_eq!(outboxes.len().await, 0);
        assert!(!outboxes.send(conn(1), ended("s1")).await);
    }
}
