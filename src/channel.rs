use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::event::CacheEvent;

/// Scope used when the host does not configure one.
pub const DEFAULT_SCOPE: &str = "default";

/// Callback invoked for every inbound event delivered to a channel.
/// A channel holds at most one registered handler.
pub type EventHandler = Arc<dyn Fn(CacheEvent) + Send + Sync>;

/// Transport-agnostic send/receive primitive connecting a synchronized
/// cache to a broker.
///
/// `send` is non-blocking and fire-and-forget: with no broker attached
/// (or a closed connection) events are silently dropped and the local
/// store stays authoritative. Delivery guarantees belong to the
/// transport, not to this contract.
pub trait SyncChannel: Send + Sync {
    /// Opaque connection identifier; stamped into emitted events as
    /// their `senderID`.
    fn id(&self) -> &str;

    fn send(&self, event: CacheEvent);

    /// Register the receive handler. Frames arriving before registration
    /// are dropped.
    fn receive(&self, handler: EventHandler);
}

/// Routing envelope carried by every transport.
///
/// `scope` names the relay group the sending connection is attached to;
/// `target` is `None` for channel-to-broker frames and names a single
/// connection on broker-to-channel frames. Addressing every relayed
/// frame to exactly one registration keeps delivery counts exact even on
/// shared media such as the loopback bus or a bridge port. The embedded
/// event is the canonical wire object, untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireFrame {
    pub scope: String,
    pub target: Option<String>,
    pub event: CacheEvent,
}

impl WireFrame {
    /// Frame sent from a channel up to the broker.
    pub fn outbound(scope: &str, event: CacheEvent) -> Self {
        Self {
            scope: scope.to_string(),
            target: None,
            event,
        }
    }

    /// Frame relayed from the broker to one registered connection.
    pub fn addressed(scope: &str, target: &str, event: CacheEvent) -> Self {
        Self {
            scope: scope.to_string(),
            target: Some(target.to_string()),
            event,
        }
    }

    /// Whether this frame is addressed to the given connection.
    pub fn is_for(&self, scope: &str, connection_id: &str) -> bool {
        self.scope == scope && self.target.as_deref() == Some(connection_id)
    }
}
