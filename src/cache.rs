use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::warn;

use crate::channel::{EventHandler, SyncChannel};
use crate::event::{CacheEvent, EventKind};
use crate::store::CacheStore;

/// Synchronized wrapper around a local cache store.
///
/// Mutations apply to the local store synchronously (read-your-writes)
/// and are then emitted on the attached channel fire-and-forget; inbound
/// events from the broker are applied on the transport's receive path.
/// Reads never touch the network.
///
/// Construction attaches the wrapper to its relay group: it registers
/// the receive handler, then emits an `init` event. When the broker
/// echoes that `init` back, the wrapper wipes its local store, so a
/// store reused across wrapper creations never leaks stale entries into
/// the shared scope. Peers already converged are not perturbed; the
/// broker never forwards a foreign `init`.
///
/// No operation surfaces an error: synchronization is best-effort and
/// eventually consistent, and with a detached channel the wrapper keeps
/// functioning on its local store alone.
pub struct SyncedCache {
    sender_id: String,
    store: Arc<dyn CacheStore>,
    channel: Arc<dyn SyncChannel>,
}

impl SyncedCache {
    pub fn new(channel: Arc<dyn SyncChannel>, store: Arc<dyn CacheStore>) -> Self {
        let sender_id = channel.id().to_string();

        let apply_store = store.clone();
        let own_id = sender_id.clone();
        let handler: EventHandler = Arc::new(move |event| {
            apply_event(apply_store.as_ref(), &own_id, event);
        });
        channel.receive(handler);
        channel.send(CacheEvent::init(&sender_id));

        Self {
            sender_id,
            store,
            channel,
        }
    }

    /// Read a key from the local store. `None` if absent.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.store.get(key)
    }

    /// Typed read; `None` on absence or when the stored value does not
    /// deserialize to `T`.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.store
            .get(key)
            .and_then(|value| serde_json::from_value(value).ok())
    }

    /// Write a key locally, then emit a `set` event to the relay group.
    /// The write is visible to the caller before the relay round trip.
    pub fn set(&self, key: &str, value: Value) {
        self.store.set(key, value.clone());
        self.channel.send(CacheEvent::set(&self.sender_id, key, &value));
    }

    /// Delete a key locally, then emit a `remove` event.
    pub fn remove(&self, key: &str) {
        self.store.remove(key);
        self.channel.send(CacheEvent::remove(&self.sender_id, key));
    }

    /// Wipe the local store, then emit a `clear` event.
    pub fn clear(&self) {
        self.store.clear();
        self.channel.send(CacheEvent::clear(&self.sender_id));
    }

    /// Connection identifier this wrapper stamps on emitted events.
    pub fn sender_id(&self) -> &str {
        &self.sender_id
    }
}

/// Apply one inbound event to the local store.
///
/// `set`/`remove`/`clear` apply unconditionally whether own or
/// peer-originated: re-applying an already-applied mutation cannot
/// diverge from applying it once, so no senderID filtering is needed.
/// `init` wipes only when it is the wrapper's own echo.
fn apply_event(store: &dyn CacheStore, own_id: &str, event: CacheEvent) {
    match event.kind {
        EventKind::Init => {
            if event.sender_id == own_id {
                store.clear();
            }
        }
        EventKind::Set => match event.payload() {
            Some(value) => store.set(&event.key, value),
            None => warn!(key = %event.key, "discarding set event with undecodable payload"),
        },
        EventKind::Remove => store.remove(&event.key),
        EventKind::Clear => store.clear(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use parking_lot::Mutex;
    use serde_json::json;

    /// Channel stub that records sends and lets tests inject inbound
    /// events synchronously.
    #[derive(Default)]
    struct StubChannel {
        sent: Mutex<Vec<CacheEvent>>,
        handler: Mutex<Option<EventHandler>>,
    }

    impl StubChannel {
        fn inject(&self, event: CacheEvent) {
            let handler = self.handler.lock().clone();
            if let Some(handler) = handler {
                handler(event);
            }
        }

        fn sent(&self) -> Vec<CacheEvent> {
            self.sent.lock().clone()
        }
    }

    impl SyncChannel for StubChannel {
        fn id(&self) -> &str {
            "stub-1"
        }

        fn send(&self, event: CacheEvent) {
            self.sent.lock().push(event);
        }

        fn receive(&self, handler: EventHandler) {
            *self.handler.lock() = Some(handler);
        }
    }

    fn wrapper() -> (Arc<StubChannel>, Arc<MemoryStore>, SyncedCache) {
        let channel = Arc::new(StubChannel::default());
        let store = Arc::new(MemoryStore::new());
        let cache = SyncedCache::new(channel.clone(), store.clone());
        (channel, store, cache)
    }

    #[test]
    fn construction_registers_then_emits_init() {
        let (channel, _, cache) = wrapper();
        let sent = channel.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0], CacheEvent::init("stub-1"));
        assert_eq!(cache.sender_id(), "stub-1");
    }

    #[test]
    fn own_init_echo_wipes_preexisting_local_state() {
        let channel = Arc::new(StubChannel::default());
        let store = Arc::new(MemoryStore::new());
        store.set("name", json!("Tom"));
        store.set("id", json!(9527));

        let cache = SyncedCache::new(channel.clone(), store.clone());
        // entries linger until the echo comes back
        assert_eq!(cache.get("name"), Some(json!("Tom")));

        channel.inject(CacheEvent::init("stub-1"));
        assert!(cache.get("name").is_none());
        assert!(cache.get("id").is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn foreign_init_does_not_wipe_converged_state() {
        let (channel, _, cache) = wrapper();
        cache.set("name", json!("Tom"));
        channel.inject(CacheEvent::init("someone-else"));
        assert_eq!(cache.get("name"), Some(json!("Tom")));
    }

    #[test]
    fn mutations_are_visible_before_any_relay() {
        let (channel, _, cache) = wrapper();
        cache.set("id", json!(9527));
        assert_eq!(cache.get("id"), Some(json!(9527)));
        assert_eq!(cache.get_as::<u32>("id"), Some(9527));

        let sent = channel.sent();
        assert_eq!(sent.last(), Some(&CacheEvent::set("stub-1", "id", &json!(9527))));

        cache.remove("id");
        assert!(cache.get("id").is_none());
        assert_eq!(channel.sent().last().map(|e| e.kind), Some(EventKind::Remove));

        cache.clear();
        assert_eq!(channel.sent().last().map(|e| e.kind), Some(EventKind::Clear));
    }

    #[test]
    fn inbound_events_apply_idempotently() {
        let (channel, store, cache) = wrapper();

        let set = CacheEvent::set("peer", "info", &json!({"sex": "male"}));
        channel.inject(set.clone());
        channel.inject(set);
        assert_eq!(cache.get("info"), Some(json!({"sex": "male"})));
        assert_eq!(store.len(), 1);

        let remove = CacheEvent::remove("peer", "info");
        channel.inject(remove.clone());
        channel.inject(remove);
        assert!(cache.get("info").is_none());
    }

    #[test]
    fn own_fan_out_echo_reapplies_harmlessly() {
        let (channel, store, cache) = wrapper();
        cache.set("name", json!("Tom"));
        // the broker includes the sender in fan-out; the echo re-applies
        channel.inject(CacheEvent::set("stub-1", "name", &json!("Tom")));
        assert_eq!(cache.get("name"), Some(json!("Tom")));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn undecodable_set_payload_is_discarded() {
        let (channel, _, cache) = wrapper();
        channel.inject(CacheEvent {
            sender_id: "peer".to_string(),
            kind: EventKind::Set,
            key: "bad".to_string(),
            value: "not json".to_string(),
        });
        assert!(cache.get("bad").is_none());
    }

    #[test]
    fn typed_read_returns_none_on_mismatch() {
        let (_, _, cache) = wrapper();
        cache.set("name", json!("Tom"));
        assert_eq!(cache.get_as::<String>("name").as_deref(), Some("Tom"));
        assert!(cache.get_as::<u64>("name").is_none());
        assert!(cache.get_as::<String>("missing").is_none());
    }
}
