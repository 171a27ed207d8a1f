//! In-process transport: events routed over a process-global
//! publish/subscribe bus. Serves single-process multi-wrapper scenarios
//! and tests.

use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tracing::debug;
use uuid::Uuid;

use crate::broker::{self, BrokerHandle, Relay, TransportKind};
use crate::channel::{EventHandler, SyncChannel, WireFrame};
use crate::event::CacheEvent;
use crate::transport::spawn_filtered_receiver;

const DOWNLINK_CAPACITY: usize = 1024;

/// The shared medium: one uplink into whichever broker is active, one
/// broadcast downlink every loopback channel subscribes to. The uplink
/// is `None` while no broker is running, so sends degrade to silent
/// drops per the best-effort delivery contract.
struct LoopbackBus {
    uplink: Mutex<Option<mpsc::UnboundedSender<WireFrame>>>,
    downlink: broadcast::Sender<WireFrame>,
}

static BUS: Lazy<LoopbackBus> = Lazy::new(|| LoopbackBus {
    uplink: Mutex::new(None),
    downlink: broadcast::channel(DOWNLINK_CAPACITY).0,
});

/// Start the in-process broker, or return the active handle if one is
/// already running (singleton per process).
///
/// Must be called from within a tokio runtime; the relay loop runs as a
/// task on it.
pub fn start_loopback_broker() -> BrokerHandle {
    broker::lookup_or_start(TransportKind::Loopback, || {
        let relay = Arc::new(Relay::new());
        let (up_tx, mut up_rx) = mpsc::unbounded_channel::<WireFrame>();
        let (conn_tx, mut conn_rx) = mpsc::unbounded_channel::<WireFrame>();
        *BUS.uplink.lock() = Some(up_tx.clone());

        // Relay output goes onto the shared downlink; channels pick out
        // the frames addressed to them.
        let forward_task = tokio::spawn(async move {
            while let Some(frame) = conn_rx.recv().await {
                let _ = BUS.downlink.send(frame);
            }
        });

        let relay_task = {
            let relay = relay.clone();
            tokio::spawn(async move {
                while let Some(frame) = up_rx.recv().await {
                    relay.dispatch(frame, &conn_tx);
                }
            })
        };

        debug!("loopback broker started");
        BrokerHandle::new(
            TransportKind::Loopback,
            relay,
            vec![relay_task, forward_task],
            move || {
                // Detach the uplink only if it is still ours; a restart
                // may already have installed a fresh one.
                let mut uplink = BUS.uplink.lock();
                if uplink.as_ref().is_some_and(|tx| tx.same_channel(&up_tx)) {
                    *uplink = None;
                }
            },
        )
    })
}

/// Create a channel attached to the loopback bus for one scope.
pub fn loopback_channel(scope: &str) -> Arc<dyn SyncChannel> {
    Arc::new(LoopbackChannel {
        id: Uuid::new_v4().to_string(),
        scope: scope.to_string(),
    })
}

struct LoopbackChannel {
    id: String,
    scope: String,
}

impl SyncChannel for LoopbackChannel {
    fn id(&self) -> &str {
        &self.id
    }

    fn send(&self, event: CacheEvent) {
        match BUS.uplink.lock().as_ref() {
            Some(uplink) => {
                let _ = uplink.send(WireFrame::outbound(&self.scope, event));
            }
            None => debug!(scope = %self.scope, "no loopback broker active, dropping event"),
        }
    }

    fn receive(&self, handler: EventHandler) {
        let _ = spawn_filtered_receiver(
            BUS.downlink.subscribe(),
            self.scope.clone(),
            self.id.clone(),
            handler,
        );
    }
}
