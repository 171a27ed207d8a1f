use std::collections::HashMap;

use parking_lot::RwLock;
use serde_json::Value;

/// Minimal key-value capability set the host caching library provides.
///
/// Implementations are synchronous and carry no network awareness; the
/// synchronization layer only ever wraps a store, it never implements
/// storage itself. Methods take `&self` so the same store can be applied
/// to concurrently from the local caller and the transport receive path;
/// interior locking is the implementation's responsibility.
pub trait CacheStore: Send + Sync {
    fn get(&self, key: &str) -> Option<Value>;
    fn set(&self, key: &str, value: Value);
    fn remove(&self, key: &str);
    fn clear(&self);
}

/// In-process hash map store used by tests, demos and hosts without
/// their own cache adapter.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl CacheStore for MemoryStore {
    fn get(&self, key: &str) -> Option<Value> {
        self.entries.read().get(key).cloned()
    }

    fn set(&self, key: &str, value: Value) {
        self.entries.write().insert(key.to_string(), value);
    }

    fn remove(&self, key: &str) {
        self.entries.write().remove(key);
    }

    fn clear(&self) {
        self.entries.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn basic_operations() {
        let store = MemoryStore::new();
        assert!(store.is_empty());
        assert!(store.get("name").is_none());

        store.set("name", json!("Tom"));
        store.set("id", json!(9527));
        assert_eq!(store.get("name"), Some(json!("Tom")));
        assert_eq!(store.len(), 2);

        store.remove("name");
        assert!(store.get("name").is_none());

        store.clear();
        assert!(store.is_empty());
    }

    #[test]
    fn reapplying_a_mutation_is_a_no_op_in_effect() {
        let store = MemoryStore::new();
        store.set("k", json!({"a": 1}));
        store.set("k", json!({"a": 1}));
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("k"), Some(json!({"a": 1})));

        store.remove("k");
        store.remove("k");
        assert!(store.is_empty());
    }

    #[test]
    fn last_write_wins_per_key() {
        let store = MemoryStore::new();
        store.set("k", json!(1));
        store.set("k", json!(2));
        assert_eq!(store.get("k"), Some(json!(2)));
    }
}
