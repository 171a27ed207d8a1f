use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::channel::WireFrame;
use crate::event::EventKind;

/// Queue handle for one registered connection; the relay pushes frames
/// here and the owning transport drains them onto its medium.
pub type ConnectionTx = mpsc::UnboundedSender<WireFrame>;

/// Transport family a broker serves. At most one broker is active per
/// kind per host process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    Loopback,
    Bridge,
    Socket,
}

/// Relay core shared by every broker transport: the scope → registration
/// map plus the fan-out algorithm.
///
/// `dispatch` runs as a single critical section per inbound event, which
/// makes the broker the sole sequencer for its scopes: all connections
/// observe relayed events in the order the relay received them.
#[derive(Default)]
pub struct Relay {
    registrations: Mutex<HashMap<String, HashMap<String, ConnectionTx>>>,
}

impl Relay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Relay one inbound frame from connection `from`.
    ///
    /// The sending connection is (re-)registered under its scope first,
    /// so the `init` a wrapper emits at attach time doubles as its
    /// registration. `init` is echoed only to the originator; everything
    /// else fans out to every registration in the scope, the sender
    /// included (idempotent apply keeps the redundant self-delivery
    /// harmless, and the receive-count contract depends on it).
    pub fn dispatch(&self, frame: WireFrame, from: &ConnectionTx) {
        let mut registrations = self.registrations.lock();
        let scope_registrations = registrations.entry(frame.scope.clone()).or_default();
        scope_registrations.insert(frame.event.sender_id.clone(), from.clone());

        match frame.event.kind {
            EventKind::Init => {
                debug!(
                    scope = %frame.scope,
                    sender = %frame.event.sender_id,
                    "connection joined, echoing init to originator"
                );
                let target = frame.event.sender_id.clone();
                let _ = from.send(WireFrame {
                    target: Some(target),
                    ..frame
                });
            }
            _ => {
                debug!(
                    scope = %frame.scope,
                    kind = ?frame.event.kind,
                    key = %frame.event.key,
                    connections = scope_registrations.len(),
                    "fanning out"
                );
                // Registrations whose connection is gone are pruned here.
                scope_registrations.retain(|sender_id, tx| {
                    tx.send(WireFrame::addressed(&frame.scope, sender_id, frame.event.clone()))
                        .is_ok()
                });
            }
        }
    }

    /// Drop every registration held by `connection`, across all scopes.
    /// Called by transports when a peer disconnects.
    pub fn deregister(&self, connection: &ConnectionTx) {
        let mut registrations = self.registrations.lock();
        for scope_registrations in registrations.values_mut() {
            scope_registrations.retain(|_, tx| !tx.same_channel(connection));
        }
        registrations.retain(|_, scope_registrations| !scope_registrations.is_empty());
    }

    /// Number of connections currently registered in a scope.
    pub fn connections(&self, scope: &str) -> usize {
        self.registrations
            .lock()
            .get(scope)
            .map_or(0, HashMap::len)
    }

    pub fn clear(&self) {
        self.registrations.lock().clear();
    }
}

struct BrokerInner {
    relay: Arc<Relay>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    on_stop: Box<dyn Fn() + Send + Sync>,
    stopped: AtomicBool,
}

/// Stop handle for an active broker. Clones all refer to the same
/// underlying relay; stopping any of them tears the broker down once.
#[derive(Clone)]
pub struct BrokerHandle {
    kind: TransportKind,
    inner: Arc<BrokerInner>,
}

impl BrokerHandle {
    pub(crate) fn new(
        kind: TransportKind,
        relay: Arc<Relay>,
        tasks: Vec<JoinHandle<()>>,
        on_stop: impl Fn() + Send + Sync + 'static,
    ) -> Self {
        Self {
            kind,
            inner: Arc::new(BrokerInner {
                relay,
                tasks: Mutex::new(tasks),
                on_stop: Box::new(on_stop),
                stopped: AtomicBool::new(false),
            }),
        }
    }

    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    /// Connections currently registered in `scope` with this broker.
    pub fn connections(&self, scope: &str) -> usize {
        self.inner.relay.connections(scope)
    }

    /// Tear down the relay: deregister from the active-broker registry,
    /// abort the relay tasks, run transport teardown and drop all
    /// registrations. Idempotent; a later construction call starts a
    /// fresh broker with an empty registration set.
    pub fn stop(&self) {
        if self.inner.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        {
            let mut active = ACTIVE.lock();
            if let Some(existing) = active.get(&self.kind) {
                if Arc::ptr_eq(&existing.inner, &self.inner) {
                    active.remove(&self.kind);
                }
            }
        }

        for task in self.inner.tasks.lock().drain(..) {
            task.abort();
        }
        (self.inner.on_stop)();
        self.inner.relay.clear();
        debug!(kind = ?self.kind, "broker stopped");
    }
}

/// Process-wide registry of active brokers, keyed by transport kind.
/// Construction is a lookup-or-create; duplicate construction while a
/// broker is active returns the existing handle.
static ACTIVE: Lazy<Mutex<HashMap<TransportKind, BrokerHandle>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

pub(crate) fn active(kind: TransportKind) -> Option<BrokerHandle> {
    ACTIVE.lock().get(&kind).cloned()
}

pub(crate) fn lookup_or_start(
    kind: TransportKind,
    start: impl FnOnce() -> BrokerHandle,
) -> BrokerHandle {
    let mut active = ACTIVE.lock();
    if let Some(handle) = active.get(&kind) {
        debug!(kind = ?kind, "broker already active, returning existing handle");
        return handle.clone();
    }
    let handle = start();
    active.insert(kind, handle.clone());
    handle
}

/// Install a freshly built broker unless one was raced in for the same
/// kind; the loser is stopped and the active handle returned. Used by
/// transports whose construction awaits before installing.
pub(crate) fn install(handle: BrokerHandle) -> BrokerHandle {
    let existing = {
        let mut active = ACTIVE.lock();
        match active.get(&handle.kind) {
            Some(existing) => Some(existing.clone()),
            None => {
                active.insert(handle.kind, handle.clone());
                None
            }
        }
    };
    match existing {
        Some(existing) => {
            handle.stop();
            existing
        }
        None => handle,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::CacheEvent;
    use serde_json::json;

    fn connection() -> (ConnectionTx, mpsc::UnboundedReceiver<WireFrame>) {
        mpsc::unbounded_channel()
    }

    #[test]
    fn init_is_echoed_only_to_the_originator() {
        let relay = Relay::new();
        let (c1, mut rx1) = connection();
        let (c2, mut rx2) = connection();

        relay.dispatch(WireFrame::outbound("s", CacheEvent::init("a")), &c1);
        relay.dispatch(WireFrame::outbound("s", CacheEvent::init("b")), &c2);

        let echo = rx1.try_recv().expect("originator gets its init back");
        assert_eq!(echo.event.kind, EventKind::Init);
        assert_eq!(echo.target.as_deref(), Some("a"));
        assert!(rx1.try_recv().is_err(), "peer init must not reach c1");

        let echo = rx2.try_recv().unwrap();
        assert_eq!(echo.target.as_deref(), Some("b"));
        assert!(rx2.try_recv().is_err());
    }

    #[test]
    fn set_fans_out_to_every_registration_including_the_sender() {
        let relay = Relay::new();
        let (c1, mut rx1) = connection();
        let (c2, mut rx2) = connection();
        let (c3, mut rx3) = connection();

        relay.dispatch(WireFrame::outbound("s", CacheEvent::init("a")), &c1);
        relay.dispatch(WireFrame::outbound("s", CacheEvent::init("b")), &c2);
        relay.dispatch(WireFrame::outbound("s", CacheEvent::init("c")), &c3);
        for rx in [&mut rx1, &mut rx2, &mut rx3] {
            rx.try_recv().unwrap();
        }

        let event = CacheEvent::set("a", "name", &json!("Tom"));
        relay.dispatch(WireFrame::outbound("s", event.clone()), &c1);

        for (rx, id) in [(&mut rx1, "a"), (&mut rx2, "b"), (&mut rx3, "c")] {
            let frame = rx.try_recv().expect("fan-out reaches every connection");
            assert_eq!(frame.event, event);
            assert_eq!(frame.target.as_deref(), Some(id));
            assert!(rx.try_recv().is_err());
        }
    }

    #[test]
    fn scopes_are_isolated() {
        let relay = Relay::new();
        let (c1, mut rx1) = connection();
        let (c2, mut rx2) = connection();

        relay.dispatch(WireFrame::outbound("a", CacheEvent::init("x")), &c1);
        relay.dispatch(WireFrame::outbound("b", CacheEvent::init("y")), &c2);
        rx1.try_recv().unwrap();
        rx2.try_recv().unwrap();

        relay.dispatch(
            WireFrame::outbound("a", CacheEvent::set("x", "k", &json!(1))),
            &c1,
        );
        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_err(), "scope b must not see scope a events");
    }

    #[test]
    fn closed_connections_are_pruned_during_fan_out() {
        let relay = Relay::new();
        let (c1, mut rx1) = connection();
        let (c2, rx2) = connection();

        relay.dispatch(WireFrame::outbound("s", CacheEvent::init("a")), &c1);
        relay.dispatch(WireFrame::outbound("s", CacheEvent::init("b")), &c2);
        rx1.try_recv().unwrap();
        assert_eq!(relay.connections("s"), 2);

        drop(rx2);
        relay.dispatch(
            WireFrame::outbound("s", CacheEvent::set("a", "k", &json!(1))),
            &c1,
        );
        assert_eq!(relay.connections("s"), 1);
    }

    #[test]
    fn deregister_drops_a_connection_everywhere() {
        let relay = Relay::new();
        let (c1, mut rx1) = connection();
        let (c2, mut rx2) = connection();

        relay.dispatch(WireFrame::outbound("a", CacheEvent::init("x")), &c1);
        relay.dispatch(WireFrame::outbound("b", CacheEvent::init("y")), &c1);
        relay.dispatch(WireFrame::outbound("a", CacheEvent::init("z")), &c2);
        rx1.try_recv().unwrap();
        rx1.try_recv().unwrap();
        rx2.try_recv().unwrap();

        relay.deregister(&c1);
        assert_eq!(relay.connections("a"), 1);
        assert_eq!(relay.connections("b"), 0);
    }

    #[test]
    fn duplicate_construction_returns_the_active_handle() {
        // Bridge is unused elsewhere in this test binary, so the global
        // registry entry is ours alone.
        let first = lookup_or_start(TransportKind::Bridge, || {
            BrokerHandle::new(TransportKind::Bridge, Arc::new(Relay::new()), vec![], || {})
        });
        let second = lookup_or_start(TransportKind::Bridge, || {
            panic!("second construction must not start a new broker")
        });
        assert!(Arc::ptr_eq(&first.inner, &second.inner));

        second.stop();
        first.stop(); // idempotent

        let fresh = lookup_or_start(TransportKind::Bridge, || {
            BrokerHandle::new(TransportKind::Bridge, Arc::new(Relay::new()), vec![], || {})
        });
        assert!(!Arc::ptr_eq(&first.inner, &fresh.inner));
        fresh.stop();
    }
}
