//! Transport layer abstraction for `ChatSync`.
//!
//! Defines the [`Transport`] trait: a persistent bidirectional event channel
//! with fire-and-forget [`emit`](Transport::emit), typed listener registration
//! via [`on`](Transport::on), and a boolean connectivity signal.
//!
//! Concrete implementations:
//! - [`socket::SocketTransport`]: WebSocket connection to the backend with
//!   bounded reconnection
//! - [`loopback::LoopbackTransport`]: in-process scripted transport for tests

pub mod bus;
pub mod loopback;
pub mod socket;

use std::time::Duration;

use tokio::sync::{mpsc, watch};

use chatsync_proto::events::{ClientEvent, EventKind, ServerEvent};

pub use bus::{EventBus, Subscription};

/// Errors that can occur inside a transport.
///
/// These never reach callers of [`Transport::emit`]; they are logged and
/// reflected in the connectivity signal. The send pipeline uses them to
/// describe why a socket delivery attempt did not confirm.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The socket URL could not be parsed or is not `ws://` / `wss://`.
    #[error("invalid socket url: {0}")]
    InvalidUrl(String),

    /// The credential cannot be carried in an HTTP header.
    #[error("credential is not a valid header value")]
    InvalidCredential,

    /// The handshake with the server failed.
    #[error("connect failed: {0}")]
    Connect(String),

    /// The connection is down or was closed while waiting.
    #[error("connection closed")]
    ConnectionClosed,

    /// The operation timed out before completing.
    #[error("transport operation timed out")]
    Timeout,

    /// The server answered with an explicit error event.
    #[error("server rejected event: {0}")]
    Rejected(String),
}

/// Reconnection policy: a bounded number of attempts with a fixed delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Attempts made after a connection is lost (or the first connect fails).
    pub max_attempts: u32,
    /// Pause before each attempt.
    pub delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay: Duration::from_secs(1),
        }
    }
}

/// Bidirectional event transport.
///
/// # Invariant
///
/// [`emit`](Self::emit) never reports failure to the caller. Events emitted
/// while disconnected are dropped; callers that need confirmation listen for
/// a reply event and apply their own timeout.
pub trait Transport: Send + Sync {
    /// Fire-and-forget send of a client event.
    fn emit(&self, event: ClientEvent);

    /// Register a listener for one kind of server event.
    ///
    /// The listener stays registered until the returned [`Subscription`] is
    /// dropped or explicitly unsubscribed.
    fn on<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&ServerEvent) + Send + Sync + 'static;

    /// Current value of the connectivity signal.
    fn is_connected(&self) -> bool;

    /// Watch handle on the connectivity signal.
    fn connectivity(&self) -> watch::Receiver<bool>;
}

/// Async view over one or more listener registrations.
///
/// Buffers matching events in an unbounded channel so a caller can `await`
/// them. All registrations are removed when the stream is dropped.
pub struct EventStream {
    rx: mpsc::UnboundedReceiver<ServerEvent>,
    _subscriptions: Vec<Subscription>,
}

impl EventStream {
    /// Subscribe to every kind in `kinds` on `transport`.
    pub fn subscribe<T: Transport + ?Sized>(transport: &T, kinds: &[EventKind]) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let subscriptions = kinds
            .iter()
            .map(|kind| {
                let tx = tx.clone();
                transport.on(*kind, move |event| {
                    let _ = tx.send(event.clone());
                })
            })
            .collect();
        Self {
            rx,
            _subscriptions: subscriptions,
        }
    }

    /// Wait for the next matching event.
    ///
    /// Returns `None` only if every registration was dropped by the transport.
    pub async fn next(&mut self) -> Option<ServerEvent> {
        self.rx.recv().await
    }
}
