//! Connection registry: conn-id allocation and outbound frame routing.
//!
//! Every connection gets an id that is a multiple of [`CLIENT_MASK`];
//! subscription ids add a random suffix below the mask, so the owning
//! connection is always recoverable by integer division. The registry maps
//! conn ids to per-connection write buffers (unbounded senders drained by the
//! connection's writer task), which keeps every `send` non-blocking.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::mpsc::UnboundedSender;
use tokio_tungstenite::tungstenite::Message;

/// Fixed partition of the u32 id space between client id (high digits) and
/// random subscription suffix (low digits).
pub const CLIENT_MASK: u32 = 10_000_000;

/// Highest client slot whose full suffix range still fits the u32 id space.
const MAX_CLIENTS: u32 = (u32::MAX - (CLIENT_MASK - 1)) / CLIENT_MASK;

#[derive(Default)]
struct Inner {
    next_client: u32,
    senders: HashMap<u32, UnboundedSender<Message>>,
}

/// Routes outbound frames to per-connection write buffers.
#[derive(Default)]
pub struct ConnectionRegistry {
    inner: Mutex<Inner>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Allocate a conn id and install the connection's outbound sender.
    /// Returns `None` when every client slot is taken.
    pub fn register(&self, sender: UnboundedSender<Message>) -> Option<u32> {
        let mut inner = self.lock();
        if inner.senders.len() >= MAX_CLIENTS as usize {
            return None;
        }
        loop {
            inner.next_client = inner.next_client % MAX_CLIENTS + 1;
            let conn_id = inner.next_client * CLIENT_MASK;
            if !inner.senders.contains_key(&conn_id) {
                inner.senders.insert(conn_id, sender);
                return Some(conn_id);
            }
        }
    }

    /// Remove a closed connection. Frames routed to it afterwards are dropped.
    pub fn unregister(&self, conn_id: u32) {
        self.lock().senders.remove(&conn_id);
    }

    /// Hand a text frame to the connection's write buffer. Returns false when
    /// the connection is gone or its buffer is closed; never blocks.
    pub fn send(&self, conn_id: u32, frame: String) -> bool {
        match self.lock().senders.get(&conn_id) {
            Some(sender) => sender.send(Message::Text(frame)).is_ok(),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[test]
    fn test_conn_ids_are_mask_multiples() {
        let registry = ConnectionRegistry::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let a = registry.register(tx.clone()).unwrap();
        let b = registry.register(tx).unwrap();
        assert_eq!(a % CLIENT_MASK, 0);
        assert_eq!(b % CLIENT_MASK, 0);
        assert_ne!(a, b);
    }

    #[test]
    fn test_slot_reuse_after_unregister() {
        let registry = ConnectionRegistry::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let a = registry.register(tx.clone()).unwrap();
        registry.unregister(a);
        // slots cycle; eventually the freed slot is handed out again
        let mut seen = false;
        for _ in 0..MAX_CLIENTS {
            let id = registry.register(tx.clone()).unwrap();
            if id == a {
                seen = true;
                break;
            }
        }
        assert!(seen);
    }

    #[tokio::test]
    async fn test_send_reaches_registered_connection() {
        let registry = ConnectionRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let conn_id = registry.register(tx).unwrap();

        assert!(registry.send(conn_id, "hello".to_string()));
        match rx.recv().await {
            Some(Message::Text(text)) => assert_eq!(text, "hello"),
            other => panic!("expected text frame, got {other:?}"),
        }
    }

    #[test]
    fn test_send_to_unknown_connection_fails() {
        let registry = ConnectionRegistry::new();
        assert!(!registry.send(CLIENT_MASK, "hello".to_string()));
    }
}
