use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single cache mutation relayed between synchronized caches.
///
/// Events are immutable once emitted; the broker and peer wrappers only
/// ever read them. On the wire this serializes to the canonical
/// `{"senderID","type","key","value"}` JSON object, where `value` is
/// itself a JSON-encoded payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEvent {
    #[serde(rename = "senderID")]
    pub sender_id: String,
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Init,
    Set,
    Remove,
    Clear,
}

impl CacheEvent {
    /// Join-time signal; the emitting connection wipes its local store
    /// when its own echo comes back.
    pub fn init(sender_id: &str) -> Self {
        Self {
            sender_id: sender_id.to_string(),
            kind: EventKind::Init,
            key: String::new(),
            value: "{}".to_string(),
        }
    }

    pub fn set(sender_id: &str, key: &str, value: &Value) -> Self {
        Self {
            sender_id: sender_id.to_string(),
            kind: EventKind::Set,
            key: key.to_string(),
            value: value.to_string(),
        }
    }

    pub fn remove(sender_id: &str, key: &str) -> Self {
        Self {
            sender_id: sender_id.to_string(),
            kind: EventKind::Remove,
            key: key.to_string(),
            value: String::new(),
        }
    }

    pub fn clear(sender_id: &str) -> Self {
        Self {
            sender_id: sender_id.to_string(),
            kind: EventKind::Clear,
            key: String::new(),
            value: String::new(),
        }
    }

    /// Serialize to the canonical wire representation.
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse an event from its wire representation. Malformed input is an
    /// error for the caller to discard; it never panics.
    pub fn decode(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Decode the JSON payload carried by a `set` event.
    pub fn payload(&self) -> Option<Value> {
        serde_json::from_str(&self.value).ok()
    }
}
