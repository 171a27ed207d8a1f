//! Cross-OS-process transport: the broker exposes a WebSocket endpoint
//! on a loopback TCP listener; channels in other processes dial it.
//! Frames travel as JSON text messages.

use std::sync::Arc;

use anyhow::Result;
use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::State,
    routing::get,
    Router,
};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::broker::{self, BrokerHandle, Relay, TransportKind};
use crate::channel::{EventHandler, SyncChannel, WireFrame};
use crate::event::CacheEvent;

#[derive(Clone)]
struct SocketState {
    relay: Arc<Relay>,
    shutdown: broadcast::Sender<()>,
}

/// Start the cross-process broker listening on `addr` (e.g.
/// `127.0.0.1:43210`), or return the active handle if one is already
/// running in this process — a duplicate call is a no-op even with a
/// different address.
///
/// The broker accepts any number of simultaneous connections and
/// deregisters a connection's scopes when the peer disconnects;
/// `stop()` closes the listening endpoint together with all active
/// connections.
pub async fn start_socket_broker(addr: &str) -> Result<BrokerHandle> {
    if let Some(handle) = broker::active(TransportKind::Socket) {
        debug!("socket broker already active, returning existing handle");
        return Ok(handle);
    }

    let relay = Arc::new(Relay::new());
    let (shutdown, _) = broadcast::channel(1);
    let state = SocketState {
        relay: relay.clone(),
        shutdown: shutdown.clone(),
    };
    let app = Router::new().route("/sync", get(ws_handler)).with_state(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "socket broker listening");

    let serve_task = tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    let handle = BrokerHandle::new(TransportKind::Socket, relay, vec![serve_task], move || {
        // Connection handlers select on this; active peers drop out.
        let _ = shutdown.send(());
    });
    Ok(broker::install(handle))
}

async fn ws_handler(
    State(state): State<SocketState>,
    ws: WebSocketUpgrade,
) -> impl axum::response::IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(state, socket))
}

async fn handle_connection(state: SocketState, socket: WebSocket) {
    let (mut sink, mut stream) = socket.split();
    let (conn_tx, mut conn_rx) = mpsc::unbounded_channel::<WireFrame>();
    let mut shutdown = state.shutdown.subscribe();

    // Relay output for this connection goes back down its own socket.
    let send_task = tokio::spawn(async move {
        while let Some(frame) = conn_rx.recv().await {
            if let Ok(text) = serde_json::to_string(&frame) {
                if sink.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
        }
    });

    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            msg = stream.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    let text: String = text.to_string();
                    match serde_json::from_str::<WireFrame>(&text) {
                        Ok(frame) => state.relay.dispatch(frame, &conn_tx),
                        Err(err) => warn!(%err, "discarding malformed sync frame"),
                    }
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    debug!("peer disconnected, deregistering its scopes");
    state.relay.deregister(&conn_tx);
    send_task.abort();
}

/// Dial a running socket broker and return a channel attached to `scope`.
///
/// Dialing can fail (connection refused); after a successful connect,
/// delivery is best-effort: a dropped connection silently discards
/// outbound events and the local store stays authoritative.
pub async fn socket_channel(addr: &str, scope: &str) -> Result<Arc<dyn SyncChannel>> {
    let url = format!("ws://{addr}/sync");
    let (ws, _) = tokio_tungstenite::connect_async(url.as_str()).await?;
    let (mut ws_tx, mut ws_rx) = ws.split();

    let id = Uuid::new_v4().to_string();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<WireFrame>();
    let handler: Arc<Mutex<Option<EventHandler>>> = Arc::new(Mutex::new(None));

    let _ = tokio::spawn(async move {
        while let Some(frame) = out_rx.recv().await {
            if let Ok(text) = serde_json::to_string(&frame) {
                if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                    break;
                }
            }
        }
        // Channel dropped: close the connection so the broker
        // deregisters this peer promptly.
        let _ = ws_tx.close().await;
    });

    let handler_slot = handler.clone();
    let own_scope = scope.to_string();
    let own_id = id.clone();
    let _ = tokio::spawn(async move {
        while let Some(msg) = ws_rx.next().await {
            match msg {
                Ok(WsMessage::Text(text)) => {
                    let text = text.to_string();
                    match serde_json::from_str::<WireFrame>(&text) {
                        Ok(frame) if frame.is_for(&own_scope, &own_id) => {
                            let registered = handler_slot.lock().clone();
                            match registered {
                                Some(handler) => handler(frame.event),
                                None => debug!("no receive handler registered, dropping frame"),
                            }
                        }
                        Ok(_) => {}
                        Err(err) => warn!(%err, "discarding malformed sync frame"),
                    }
                }
                Ok(WsMessage::Close(_)) | Err(_) => break,
                Ok(_) => {}
            }
        }
    });

    Ok(Arc::new(SocketChannel {
        id,
        scope: scope.to_string(),
        out_tx,
        handler,
    }))
}

struct SocketChannel {
    id: String,
    scope: String,
    out_tx: mpsc::UnboundedSender<WireFrame>,
    handler: Arc<Mutex<Option<EventHandler>>>,
}

impl SyncChannel for SocketChannel {
    fn id(&self) -> &str {
        &self.id
    }

    fn send(&self, event: CacheEvent) {
        if self
            .out_tx
            .send(WireFrame::outbound(&self.scope, event))
            .is_err()
        {
            debug!(scope = %self.scope, "socket connection closed, dropping event");
        }
    }

    fn receive(&self, handler: EventHandler) {
        *self.handler.lock() = Some(handler);
    }
}
