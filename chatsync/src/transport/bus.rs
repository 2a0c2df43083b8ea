//! Typed publish/subscribe registry shared by every transport.
//!
//! Handlers are keyed by [`EventKind`]. Registration returns a
//! [`Subscription`] whose drop removes the handler, so switching
//! conversations cannot leak listeners.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use chatsync_proto::events::{EventKind, ServerEvent};

type Handler = Arc<dyn Fn(&ServerEvent) + Send + Sync>;

struct Listener {
    id: u64,
    kind: EventKind,
    handler: Handler,
}

#[derive(Default)]
struct Registry {
    next_id: AtomicU64,
    listeners: Mutex<Vec<Listener>>,
}

/// Listener registry with typed dispatch.
#[derive(Clone, Default)]
pub struct EventBus {
    registry: Arc<Registry>,
}

impl EventBus {
    /// Creates an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for events of `kind`.
    pub fn on<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&ServerEvent) + Send + Sync + 'static,
    {
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        self.registry.listeners.lock().push(Listener {
            id,
            kind,
            handler: Arc::new(handler),
        });
        tracing::trace!(listener = id, event = %kind, "listener registered");
        Subscription {
            id,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Delivers `event` to every handler registered for its kind.
    ///
    /// Handlers run outside the registry lock, so a handler may register or
    /// drop subscriptions. Returns the number of handlers invoked.
    pub fn dispatch(&self, event: &ServerEvent) -> usize {
        let kind = event.kind();
        let handlers: Vec<Handler> = self
            .registry
            .listeners
            .lock()
            .iter()
            .filter(|l| l.kind == kind)
            .map(|l| Arc::clone(&l.handler))
            .collect();
        if handlers.is_empty() {
            tracing::trace!(event = %kind, "no listener for event");
        }
        for handler in &handlers {
            handler(event);
        }
        handlers.len()
    }

    /// Number of currently registered handlers.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.registry.listeners.lock().len()
    }
}

/// Handle returned by [`EventBus::on`]. Dropping it unregisters the handler.
#[must_use = "dropping a Subscription immediately unregisters the listener"]
pub struct Subscription {
    id: u64,
    registry: Weak<Registry>,
}

impl Subscription {
    /// Unregisters the handler now.
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.listeners.lock().retain(|l| l.id != self.id);
            tracing::trace!(listener = self.id, "listener removed");
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}
