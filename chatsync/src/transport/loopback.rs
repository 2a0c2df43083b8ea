//! Loopback transport for testing.
//!
//! [`LoopbackTransport`] never touches the network. Tests drive it directly:
//! flip the connectivity signal with [`set_connected`](LoopbackTransport::set_connected),
//! push server events with [`inject`](LoopbackTransport::inject), and script
//! replies to emitted events with [`respond_with`](LoopbackTransport::respond_with).

use parking_lot::Mutex;
use tokio::sync::watch;

use chatsync_proto::events::{ClientEvent, EventKind, ServerEvent};

use super::{EventBus, Subscription, Transport};

type Responder = Box<dyn Fn(&ClientEvent) -> Vec<ServerEvent> + Send + Sync>;

/// In-process transport with a scriptable server side.
pub struct LoopbackTransport {
    bus: EventBus,
    connected: watch::Sender<bool>,
    /// Events that were emitted while connected, in order.
    emitted: Mutex<Vec<ClientEvent>>,
    responder: Mutex<Option<Responder>>,
}

impl LoopbackTransport {
    /// Create a transport with the given initial connectivity.
    #[must_use]
    pub fn new(connected: bool) -> Self {
        let (tx, _rx) = watch::channel(connected);
        Self {
            bus: EventBus::new(),
            connected: tx,
            emitted: Mutex::new(Vec::new()),
            responder: Mutex::new(None),
        }
    }

    /// Install a function that produces server replies for each emitted event.
    ///
    /// Replies are dispatched synchronously from inside [`Transport::emit`].
    pub fn respond_with<F>(&self, responder: F)
    where
        F: Fn(&ClientEvent) -> Vec<ServerEvent> + Send + Sync + 'static,
    {
        *self.responder.lock() = Some(Box::new(responder));
    }

    /// Remove the responder; emitted events then go unanswered.
    pub fn clear_responder(&self) {
        *self.responder.lock() = None;
    }

    /// Change the connectivity signal.
    pub fn set_connected(&self, connected: bool) {
        self.connected.send_replace(connected);
    }

    /// Deliver a server event to registered listeners.
    pub fn inject(&self, event: &ServerEvent) -> usize {
        self.bus.dispatch(event)
    }

    /// Snapshot of events emitted while connected.
    pub fn emitted(&self) -> Vec<ClientEvent> {
        self.emitted.lock().clone()
    }

    /// Number of live listener registrations.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.bus.listener_count()
    }
}

impl Transport for LoopbackTransport {
    fn emit(&self, event: ClientEvent) {
        if !self.is_connected() {
            tracing::debug!(event = event.name(), "loopback offline, dropping event");
            return;
        }
        self.emitted.lock().push(event.clone());
        let replies = self
            .responder
            .lock()
            .as_ref()
            .map(|respond| respond(&event))
            .unwrap_or_default();
        for reply in &replies {
            self.bus.dispatch(reply);
        }
    }

    fn on<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&ServerEvent) + Send + Sync + 'static,
    {
        self.bus.on(kind, handler)
    }

    fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    fn connectivity(&self) -> watch::Receiver<bool> {
        self.connected.subscribe()
    }
}
