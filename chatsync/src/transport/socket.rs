//! WebSocket transport to the marketplace backend.
//!
//! [`SocketTransport::connect`] spawns a supervisor task that owns the
//! socket. The supervisor dispatches inbound JSON frames to the
//! [`EventBus`], writes outbound frames queued by [`Transport::emit`], and on
//! connection loss retries according to the [`ReconnectPolicy`]. Once the
//! attempts are exhausted the connection stays down until `connect` is called
//! again (for example after a credential refresh).
//!
//! Failures never propagate to callers; they are logged and reflected in the
//! connectivity signal.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;

use chatsync_proto::codec;
use chatsync_proto::events::{ClientEvent, EventKind, ServerEvent};

use super::{EventBus, ReconnectPolicy, Subscription, Transport, TransportError};
use crate::credential::Credential;

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Timeout for a single connection attempt (TCP + TLS + handshake).
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// State shared between the transport handle and its supervisor task.
struct Link {
    url: Url,
    auth: HeaderValue,
    policy: ReconnectPolicy,
    bus: EventBus,
    connected: Arc<watch::Sender<bool>>,
}

/// Why a live connection ended.
enum Exit {
    /// The connection dropped; the supervisor should reconnect.
    Lost(String),
    /// The transport handle went away; the supervisor should stop.
    Shutdown,
}

/// WebSocket transport implementing [`Transport`].
pub struct SocketTransport {
    url: Url,
    policy: ReconnectPolicy,
    bus: EventBus,
    connected: Arc<watch::Sender<bool>>,
    /// Queue feeding the current supervisor's writer.
    outgoing: Mutex<Option<mpsc::UnboundedSender<String>>>,
    supervisor: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl SocketTransport {
    /// Create a disconnected transport for `url` (`ws://` or `wss://`).
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidUrl`] if the URL does not parse or
    /// uses another scheme.
    pub fn new(url: &str, policy: ReconnectPolicy) -> Result<Self, TransportError> {
        let url = Url::parse(url).map_err(|e| TransportError::InvalidUrl(format!("{url}: {e}")))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(TransportError::InvalidUrl(format!(
                "unsupported scheme `{}`",
                url.scheme()
            )));
        }
        let (tx, _rx) = watch::channel(false);
        Ok(Self {
            url,
            policy,
            bus: EventBus::new(),
            connected: Arc::new(tx),
            outgoing: Mutex::new(None),
            supervisor: Mutex::new(None),
        })
    }

    /// Start (or restart) the connection using `credential`.
    ///
    /// Returns immediately; connection progress is reported through
    /// [`Transport::connectivity`]. Any previous supervisor is stopped first.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidCredential`] if the token cannot be
    /// sent as a header value.
    pub fn connect(&self, credential: &Credential) -> Result<(), TransportError> {
        let auth =
            HeaderValue::from_str(&credential.bearer()).map_err(|_| TransportError::InvalidCredential)?;
        self.stop();

        let (tx, rx) = mpsc::unbounded_channel();
        let link = Link {
            url: self.url.clone(),
            auth,
            policy: self.policy,
            bus: self.bus.clone(),
            connected: Arc::clone(&self.connected),
        };
        *self.outgoing.lock() = Some(tx);
        *self.supervisor.lock() = Some(tokio::spawn(supervise(link, rx)));
        tracing::debug!(url = %self.url, "socket supervisor started");
        Ok(())
    }

    /// Tear the connection down. No reconnection is attempted afterwards.
    pub fn disconnect(&self) {
        self.stop();
        tracing::info!(url = %self.url, "socket disconnected");
    }

    /// The socket URL.
    #[must_use]
    pub fn url(&self) -> &str {
        self.url.as_str()
    }

    /// The reconnection policy in use.
    #[must_use]
    pub const fn policy(&self) -> ReconnectPolicy {
        self.policy
    }

    fn stop(&self) {
        self.outgoing.lock().take();
        if let Some(handle) = self.supervisor.lock().take() {
            handle.abort();
        }
        self.connected.send_replace(false);
    }
}

impl Drop for SocketTransport {
    fn drop(&mut self) {
        if let Some(handle) = self.supervisor.lock().take() {
            handle.abort();
        }
    }
}

impl Transport for SocketTransport {
    fn emit(&self, event: ClientEvent) {
        if !self.is_connected() {
            tracing::debug!(event = event.name(), "socket offline, dropping event");
            return;
        }
        let frame = match codec::encode_client(&event) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(event = event.name(), error = %e, "failed to encode event");
                return;
            }
        };
        if let Some(tx) = self.outgoing.lock().as_ref()
            && tx.send(frame).is_err()
        {
            tracing::debug!(event = event.name(), "socket supervisor gone, dropping event");
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

/// Supervisor task: connect, pump frames, reconnect with a bounded budget.
async fn supervise(link: Link, mut outgoing: mpsc::UnboundedReceiver<String>) {
    let mut attempt = 0u32;
    loop {
        match open(&link.url, &link.auth).await {
            Ok(stream) => {
                attempt = 0;
                link.connected.send_replace(true);
                tracing::info!(url = %link.url, "socket connected");

                let exit = run_connection(stream, &link.bus, &mut outgoing).await;
                link.connected.send_replace(false);
                match exit {
                    Exit::Shutdown => {
                        tracing::debug!("socket supervisor shutting down");
                        return;
                    }
                    Exit::Lost(reason) => {
                        tracing::warn!(url = %link.url, reason = %reason, "socket connection lost");
                    }
                }
            }
            Err(e) => {
                tracing::warn!(url = %link.url, attempt, error = %e, "socket connect failed");
            }
        }

        if attempt >= link.policy.max_attempts {
            tracing::warn!(
                max_attempts = link.policy.max_attempts,
                "reconnect attempts exhausted, staying offline until next connect"
            );
            return;
        }
        attempt += 1;
        tracing::info!(
            attempt,
            max_attempts = link.policy.max_attempts,
            "reconnecting socket"
        );
        tokio::time::sleep(link.policy.delay).await;
    }
}

/// Open one authenticated WebSocket connection.
async fn open(url: &Url, auth: &HeaderValue) -> Result<WsStream, TransportError> {
    let mut request = url
        .as_str()
        .into_client_request()
        .map_err(|e| TransportError::InvalidUrl(e.to_string()))?;
    request.headers_mut().insert(AUTHORIZATION, auth.clone());

    let (stream, _response) = tokio::time::timeout(CONNECT_TIMEOUT, connect_async(request))
        .await
        .map_err(|_| TransportError::Timeout)?
        .map_err(map_ws_connect_error)?;
    Ok(stream)
}

/// Pump frames in both directions until the connection ends.
async fn run_connection(
    stream: WsStream,
    bus: &EventBus,
    outgoing: &mut mpsc::UnboundedReceiver<String>,
) -> Exit {
    let (mut writer, mut reader) = stream.split();
    loop {
        tokio::select! {
            incoming = reader.next() => match incoming {
                Some(Ok(Message::Text(text))) => dispatch_frame(bus, text.as_str()),
                Some(Ok(Message::Close(_))) => return Exit::Lost("closed by server".into()),
                Some(Ok(_)) => {
                    // Ping/pong are answered by tungstenite; binary frames are not part of the protocol.
                }
                Some(Err(e)) => return Exit::Lost(format!("read error: {e}")),
                None => return Exit::Lost("stream ended".into()),
            },
            frame = outgoing.recv() => match frame {
                Some(frame) => {
                    if let Err(e) = writer.send(Message::Text(frame.into())).await {
                        return Exit::Lost(format!("write error: {e}"));
                    }
                }
                None => {
                    let _ = writer.close().await;
                    return Exit::Shutdown;
                }
            },
        }
    }
}

/// Decode one text frame and hand it to listeners. Malformed frames are skipped.
fn dispatch_frame(bus: &EventBus, frame: &str) {
    match codec::decode_server(frame) {
        Ok(event) => {
            tracing::trace!(event = %event.kind(), "socket event");
            bus.dispatch(&event);
        }
        Err(e) => {
            tracing::warn!(error = %e, "malformed socket frame, skipping");
        }
    }
}

/// Map a `tokio_tungstenite` connection error to a [`TransportError`].
fn map_ws_connect_error(err: tokio_tungstenite::tungstenite::Error) -> TransportError {
    use tokio_tungstenite::tungstenite::Error as WsError;
    match err {
        WsError::Io(io_err) => TransportError::Connect(io_err.to_string()),
        WsError::Http(response) => {
            TransportError::Connect(format!("handshake rejected: HTTP {}", response.status()))
        }
        WsError::Url(e) => TransportError::InvalidUrl(e.to_string()),
        other => TransportError::Connect(other.to_string()),
    }
}
