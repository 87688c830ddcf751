//! Subscription bookkeeping and change-event delivery.
//!
//! State is a map of signal uuid to `{subscription id -> client id}` plus a
//! FIFO buffer of pending events. Writers enqueue synchronously and never
//! block; a single background task drains the buffer and hands frames to the
//! owning connection's write buffer. Per subscription id, events are
//! delivered in enqueue order; nothing is guaranteed across subscriptions.

use crate::registry::{ConnectionRegistry, CLIENT_MASK};
use chrono::Utc;
use rand::Rng;
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use vss_core::{Channel, CoreError, Path, SignalTree};
use vss_protocol::{encode_frame, response};

/// Span of the random subscription-id suffix; strictly below [`CLIENT_MASK`]
/// so the suffix never bleeds into the client-id digits.
pub const RAND_SPAN: u32 = 9_999_999;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

struct Event {
    subscription_id: u32,
    value: Value,
    timestamp: i64,
}

#[derive(Default)]
struct Inner {
    /// signal uuid -> {subscription id -> client id}
    handles: HashMap<String, HashMap<u32, u32>>,
    /// process-wide set of live subscription ids
    used: HashSet<u32>,
    buffer: VecDeque<Event>,
    running: bool,
}

/// Fan-out of value changes to subscribed clients.
pub struct SubscriptionEngine {
    inner: Mutex<Inner>,
    registry: Arc<ConnectionRegistry>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SubscriptionEngine {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner::default()),
            registry,
            worker: Mutex::new(None),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Spawn the delivery task. A second call while running is a no-op.
    pub fn start(self: &Arc<Self>) {
        let mut worker = self
            .worker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if worker.is_some() {
            return;
        }
        self.lock().running = true;
        let engine = Arc::clone(self);
        *worker = Some(tokio::spawn(async move { engine.delivery_loop().await }));
    }

    /// Subscribe the channel's connection to a single leaf.
    ///
    /// The path must resolve to exactly one leaf the channel may read. The
    /// returned id encodes the client id in its high digits.
    pub fn subscribe(
        &self,
        channel: &Channel,
        tree: &SignalTree,
        path: &Path,
    ) -> Result<u32, CoreError> {
        let leaves = tree.get_leaf_paths(path);
        let leaf = match leaves.as_slice() {
            [] => return Err(CoreError::PathNotFound(path.as_str().to_string())),
            [leaf] => leaf,
            _ => return Err(CoreError::NotSingleSignal(path.as_str().to_string())),
        };
        if !channel.can_read(leaf.as_str()) {
            return Err(CoreError::NoPermission(format!(
                "no permission to subscribe to {leaf}"
            )));
        }
        let node = tree
            .node(leaf)
            .ok_or_else(|| CoreError::Generic(format!("{leaf} vanished during subscribe")))?;
        let uuid = node.uuid.clone();
        let conn_id = channel.conn_id();

        let mut inner = self.lock();
        let mut rng = rand::thread_rng();
        let subscription_id = loop {
            let candidate = conn_id + rng.gen_range(0..RAND_SPAN);
            if inner.used.insert(candidate) {
                break candidate;
            }
        };
        inner
            .handles
            .entry(uuid)
            .or_default()
            .insert(subscription_id, conn_id / CLIENT_MASK);
        debug!(subscription_id, %leaf, "subscription created");
        Ok(subscription_id)
    }

    /// Remove one subscription. Returns whether anything was removed; the
    /// removal itself is a silent no-op for unknown ids.
    pub fn unsubscribe(&self, subscription_id: u32) -> bool {
        let mut inner = self.lock();
        let mut removed = false;
        for subscriptions in inner.handles.values_mut() {
            removed |= subscriptions.remove(&subscription_id).is_some();
        }
        inner.used.remove(&subscription_id);
        removed
    }

    /// Remove every subscription held by the given connection.
    pub fn unsubscribe_all(&self, conn_id: u32) {
        let client_id = conn_id / CLIENT_MASK;
        let mut inner = self.lock();
        let mut dropped = Vec::new();
        for subscriptions in inner.handles.values_mut() {
            subscriptions.retain(|subscription_id, owner| {
                if *owner == client_id {
                    dropped.push(*subscription_id);
                    false
                } else {
                    true
                }
            });
        }
        for subscription_id in &dropped {
            inner.used.remove(subscription_id);
        }
        if !dropped.is_empty() {
            debug!(conn_id, count = dropped.len(), "dropped subscriptions");
        }
    }

    /// Enqueue one event per subscriber of the signal. Constant-time per
    /// subscriber, never blocks, called synchronously from the set path.
    pub fn update_by_uuid(&self, uuid: &str, value: &Value) {
        let timestamp = Utc::now().timestamp();
        let mut inner = self.lock();
        let Some(subscriptions) = inner.handles.get(uuid) else {
            return;
        };
        let ids: Vec<u32> = subscriptions.keys().copied().collect();
        for subscription_id in ids {
            inner.buffer.push_back(Event {
                subscription_id,
                value: value.clone(),
                timestamp,
            });
        }
    }

    /// Stop the delivery task and discard buffered events.
    pub async fn shutdown(&self) {
        {
            let mut inner = self.lock();
            inner.running = false;
            inner.buffer.clear();
        }
        let handle = self
            .worker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = handle {
            if handle.await.is_err() {
                warn!("subscription delivery task ended abnormally");
            }
        }
    }

    async fn delivery_loop(&self) {
        debug!("subscription delivery task started");
        loop {
            // pop under the lock, send outside it
            let event = {
                let mut inner = self.lock();
                if !inner.running {
                    break;
                }
                inner.buffer.pop_front()
            };
            match event {
                Some(event) => self.deliver(event),
                None => tokio::time::sleep(POLL_INTERVAL).await,
            }
        }
        info!("subscription delivery task stopped");
    }

    fn deliver(&self, event: Event) {
        let frame =
            response::subscription_event(event.subscription_id, event.value, event.timestamp);
        let text = match encode_frame(&frame) {
            Ok(text) => text,
            Err(e) => {
                error!("failed to encode subscription event: {e}");
                return;
            }
        };
        let conn_id = event.subscription_id / CLIENT_MASK * CLIENT_MASK;
        if !self.registry.send(conn_id, text) {
            warn!(
                subscription_id = event.subscription_id,
                "dropping event for closed connection"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap as StdHashMap;
    use tokio::sync::mpsc;
    use tokio::time::timeout;
    use tokio_tungstenite::tungstenite::Message;
    use vss_core::Permission;

    fn test_tree() -> SignalTree {
        let doc = json!({
            "Vehicle": {
                "type": "branch",
                "uuid": "0aa",
                "children": {
                    "Speed": {"type": "sensor", "datatype": "int32", "uuid": "0ab"},
                    "Gear": {"type": "sensor", "datatype": "int8", "uuid": "0ac"}
                }
            }
        });
        SignalTree::from_document(&doc).unwrap()
    }

    fn readable_channel(conn_id: u32) -> Channel {
        let mut channel = Channel::new(conn_id);
        let mut perms = StdHashMap::new();
        perms.insert("Vehicle.Speed".to_string(), Permission::parse("r").unwrap());
        perms.insert("Vehicle.Gear".to_string(), Permission::parse("r").unwrap());
        channel.authorize(i64::MAX, perms, false);
        channel
    }

    fn engine_with_registry() -> (Arc<SubscriptionEngine>, Arc<ConnectionRegistry>) {
        let registry = Arc::new(ConnectionRegistry::new());
        (SubscriptionEngine::new(Arc::clone(&registry)), registry)
    }

    #[test]
    fn test_subscription_id_encodes_client_id() {
        let (engine, _registry) = engine_with_registry();
        let tree = test_tree();
        let conn_id = 3 * CLIENT_MASK;
        let channel = readable_channel(conn_id);

        for _ in 0..50 {
            let id = engine
                .subscribe(&channel, &tree, &Path::parse("Vehicle.Speed").unwrap())
                .unwrap();
            assert_eq!(id / CLIENT_MASK, conn_id / CLIENT_MASK);
        }
    }

    #[test]
    fn test_subscribe_unknown_path() {
        let (engine, _registry) = engine_with_registry();
        let tree = test_tree();
        let channel = readable_channel(CLIENT_MASK);
        let err = engine
            .subscribe(&channel, &tree, &Path::parse("Vehicle.Nope").unwrap())
            .unwrap_err();
        assert!(matches!(err, CoreError::PathNotFound(_)));
    }

    #[test]
    fn test_subscribe_branch_is_not_single_signal() {
        let (engine, _registry) = engine_with_registry();
        let tree = test_tree();
        let channel = readable_channel(CLIENT_MASK);
        let err = engine
            .subscribe(&channel, &tree, &Path::parse("Vehicle").unwrap())
            .unwrap_err();
        assert!(matches!(err, CoreError::NotSingleSignal(_)));
    }

    #[test]
    fn test_subscribe_without_read_permission() {
        let (engine, _registry) = engine_with_registry();
        let tree = test_tree();
        let channel = Channel::new(CLIENT_MASK);
        let err = engine
            .subscribe(&channel, &tree, &Path::parse("Vehicle.Speed").unwrap())
            .unwrap_err();
        assert!(matches!(err, CoreError::NoPermission(_)));
    }

    #[test]
    fn test_unsubscribe_reports_removal() {
        let (engine, _registry) = engine_with_registry();
        let tree = test_tree();
        let channel = readable_channel(CLIENT_MASK);
        let id = engine
            .subscribe(&channel, &tree, &Path::parse("Vehicle.Speed").unwrap())
            .unwrap();

        assert!(engine.unsubscribe(id));
        assert!(!engine.unsubscribe(id));
        assert!(!engine.unsubscribe(12345));
    }

    #[test]
    fn test_unsubscribe_all_clears_client() {
        let (engine, _registry) = engine_with_registry();
        let tree = test_tree();
        let mine = readable_channel(CLIENT_MASK);
        let other = readable_channel(2 * CLIENT_MASK);

        let id_mine = engine
            .subscribe(&mine, &tree, &Path::parse("Vehicle.Speed").unwrap())
            .unwrap();
        let id_gear = engine
            .subscribe(&mine, &tree, &Path::parse("Vehicle.Gear").unwrap())
            .unwrap();
        let id_other = engine
            .subscribe(&other, &tree, &Path::parse("Vehicle.Speed").unwrap())
            .unwrap();

        engine.unsubscribe_all(CLIENT_MASK);

        assert!(!engine.unsubscribe(id_mine));
        assert!(!engine.unsubscribe(id_gear));
        assert!(engine.unsubscribe(id_other));
    }

    #[tokio::test]
    async fn test_update_delivers_to_subscriber() {
        let (engine, registry) = engine_with_registry();
        let tree = test_tree();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let conn_id = registry.register(tx).unwrap();
        let channel = readable_channel(conn_id);
        let id = engine
            .subscribe(&channel, &tree, &Path::parse("Vehicle.Speed").unwrap())
            .unwrap();

        engine.start();
        engine.update_by_uuid("0ab", &json!(7));

        let msg = timeout(Duration::from_millis(500), rx.recv())
            .await
            .expect("event within 500ms")
            .expect("channel open");
        let Message::Text(text) = msg else {
            panic!("expected text frame");
        };
        let frame: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(frame["action"], "subscribe");
        assert_eq!(frame["subscriptionId"], id);
        assert_eq!(frame["value"], 7);
        assert!(frame["timestamp"].is_i64());

        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_events_for_one_subscription_keep_order() {
        let (engine, registry) = engine_with_registry();
        let tree = test_tree();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let conn_id = registry.register(tx).unwrap();
        let channel = readable_channel(conn_id);
        engine
            .subscribe(&channel, &tree, &Path::parse("Vehicle.Speed").unwrap())
            .unwrap();

        // every set produces one event per subscriber; no coalescing
        for value in 0..5 {
            engine.update_by_uuid("0ab", &json!(value));
        }
        engine.start();

        for expected in 0..5 {
            let msg = timeout(Duration::from_millis(500), rx.recv())
                .await
                .expect("event within 500ms")
                .expect("channel open");
            let Message::Text(text) = msg else {
                panic!("expected text frame");
            };
            let frame: Value = serde_json::from_str(&text).unwrap();
            assert_eq!(frame["value"], expected);
        }

        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_update_for_unknown_uuid_is_ignored() {
        let (engine, _registry) = engine_with_registry();
        engine.update_by_uuid("no-such-uuid", &json!(1));
        assert!(engine.lock().buffer.is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_discards_buffered_events() {
        let (engine, registry) = engine_with_registry();
        let tree = test_tree();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let conn_id = registry.register(tx).unwrap();
        let channel = readable_channel(conn_id);
        engine
            .subscribe(&channel, &tree, &Path::parse("Vehicle.Speed").unwrap())
            .unwrap();

        engine.update_by_uuid("0ab", &json!(1));
        engine.shutdown().await;

        assert!(engine.lock().buffer.is_empty());
        assert!(timeout(Duration::from_millis(100), rx.recv()).await.is_err());
    }
}
