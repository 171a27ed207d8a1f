//! # Syncache - Cross-Process Shared Cache Synchronization
//!
//! Keeps the local key-value caches of several independent runtime
//! instances (processes, main/renderer pairs, or wrappers within one
//! process) consistent by relaying mutation events through a central
//! broker over a pluggable transport.
//!
//! ## How it works
//!
//! A [`SyncedCache`] wraps the host's local cache store. Mutations apply
//! locally first, then an event is emitted on the attached channel; the
//! broker fans it out to every connection in the same scope and each
//! peer applies it to its own store. Consistency is eventual,
//! last-write-wins per key, and achieved purely through event
//! replication: no two wrappers ever share a store instance.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use syncache::{loopback_channel, start_loopback_broker, MemoryStore, SyncedCache};
//!
//! #[tokio::main]
//! async fn main() {
//!     let broker = start_loopback_broker();
//!
//!     let cache_a = SyncedCache::new(loopback_channel("session"), Arc::new(MemoryStore::new()));
//!     let cache_b = SyncedCache::new(loopback_channel("session"), Arc::new(MemoryStore::new()));
//!
//!     cache_a.set("name", serde_json::json!("Tom"));
//!     // after one relay round trip, cache_b.get("name") converges
//!
//!     broker.stop();
//! }
//! ```
//!
//! For cross-process setups run `syncache-broker` (or call
//! [`start_socket_broker`]) in one process and attach channels from the
//! others with [`socket_channel`].

pub mod broker;
pub mod cache;
pub mod channel;
pub mod event;
pub mod store;
pub mod transport;

// Re-export main types for library consumers
pub use broker::{BrokerHandle, Relay, TransportKind};
pub use cache::SyncedCache;
pub use channel::{EventHandler, SyncChannel, WireFrame, DEFAULT_SCOPE};
pub use event::{CacheEvent, EventKind};
pub use store::{CacheStore, MemoryStore};
pub use transport::bridge::{bridge_channel, bridge_pair, start_bridge_broker, BridgeClient, BridgeHost};
pub use transport::loopback::{loopback_channel, start_loopback_broker};
pub use transport::socket::{socket_channel, start_socket_broker};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
