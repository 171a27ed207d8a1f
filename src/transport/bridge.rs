//! Host-process bridge transport for main/renderer-style process pairs:
//! one side owns the broker, the other side's channels forward through a
//! host-provided one-way-pair messaging primitive.
//!
//! `bridge_pair` stands in for that primitive: a fire-and-forget uplink
//! from the client side to the host plus a broadcast downlink back. Many
//! channels may share one client port, which is why relayed frames are
//! addressed to a single connection and filtered on delivery.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tracing::debug;
use uuid::Uuid;

use crate::broker::{self, BrokerHandle, Relay, TransportKind};
use crate::channel::{EventHandler, SyncChannel, WireFrame};
use crate::event::CacheEvent;
use crate::transport::spawn_filtered_receiver;

const DOWNLINK_CAPACITY: usize = 1024;

/// Broker-side endpoint of the pair; consumed by `start_bridge_broker`.
pub struct BridgeHost {
    uplink_rx: mpsc::UnboundedReceiver<WireFrame>,
    downlink: broadcast::Sender<WireFrame>,
}

/// Channel-side endpoint; cheap to clone and share across wrappers.
#[derive(Clone)]
pub struct BridgeClient {
    uplink: mpsc::UnboundedSender<WireFrame>,
    downlink: broadcast::Sender<WireFrame>,
}

/// Create the two ends of a host/client message-port pair.
pub fn bridge_pair() -> (BridgeHost, BridgeClient) {
    let (uplink, uplink_rx) = mpsc::unbounded_channel();
    let (downlink, _) = broadcast::channel(DOWNLINK_CAPACITY);
    (
        BridgeHost {
            uplink_rx,
            downlink: downlink.clone(),
        },
        BridgeClient { uplink, downlink },
    )
}

/// Start the broker on the host side of the pair, or return the active
/// handle if one is already running (singleton per process; a duplicate
/// call drops its `host` unused).
///
/// Must be called from within a tokio runtime.
pub fn start_bridge_broker(host: BridgeHost) -> BrokerHandle {
    broker::lookup_or_start(TransportKind::Bridge, move || {
        let relay = Arc::new(Relay::new());
        let mut uplink_rx = host.uplink_rx;
        let downlink = host.downlink;
        let (conn_tx, mut conn_rx) = mpsc::unbounded_channel::<WireFrame>();

        let forward_task = tokio::spawn(async move {
            while let Some(frame) = conn_rx.recv().await {
                let _ = downlink.send(frame);
            }
        });

        let relay_task = {
            let relay = relay.clone();
            tokio::spawn(async move {
                while let Some(frame) = uplink_rx.recv().await {
                    relay.dispatch(frame, &conn_tx);
                }
            })
        };

        debug!("bridge broker started");
        BrokerHandle::new(
            TransportKind::Bridge,
            relay,
            vec![relay_task, forward_task],
            || {},
        )
    })
}

/// Create a channel that forwards through the client side of the pair
/// for one scope.
pub fn bridge_channel(client: &BridgeClient, scope: &str) -> Arc<dyn SyncChannel> {
    Arc::new(BridgeChannel {
        id: Uuid::new_v4().to_string(),
        scope: scope.to_string(),
        uplink: client.uplink.clone(),
        downlink: client.downlink.clone(),
    })
}

struct BridgeChannel {
    id: String,
    scope: String,
    uplink: mpsc::UnboundedSender<WireFrame>,
    downlink: broadcast::Sender<WireFrame>,
}

impl SyncChannel for BridgeChannel {
    fn id(&self) -> &str {
        &self.id
    }

    fn send(&self, event: CacheEvent) {
        if self
            .uplink
            .send(WireFrame::outbound(&self.scope, event))
            .is_err()
        {
            debug!(scope = %self.scope, "bridge host gone, dropping event");
        }
    }

    fn receive(&self, handler: EventHandler) {
        let _ = spawn_filtered_receiver(
            self.downlink.subscribe(),
            self.scope.clone(),
            self.id.clone(),
            handler,
        );
    }
}
