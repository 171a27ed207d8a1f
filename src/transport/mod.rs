pub mod bridge;
pub mod loopback;
pub mod socket;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::channel::{EventHandler, WireFrame};

/// Drain a broadcast downlink, delivering to `handler` only the frames
/// addressed to this connection. Shared by the transports whose medium
/// is a process-local broadcast (loopback bus, bridge port).
pub(crate) fn spawn_filtered_receiver(
    mut downlink: broadcast::Receiver<WireFrame>,
    scope: String,
    connection_id: String,
    handler: EventHandler,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match downlink.recv().await {
                Ok(frame) if frame.is_for(&scope, &connection_id) => handler(frame.event),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "sync receiver lagged, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
