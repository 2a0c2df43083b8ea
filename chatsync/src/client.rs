//! Login-scoped context owning the shared connection.
//!
//! A [`ClientSession`] is built at login: it owns the socket transport and the
//! REST client, and hands them to every [`ChatSession`] it opens. Logging out
//! tears the socket down.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use chatsync_proto::message::{SenderProfile, UserId};

use crate::api::{ApiError, HttpApi};
use crate::chat::scope::ConversationScope;
use crate::chat::{ChatEvent, ChatSession, SyncConfig};
use crate::config::{ConfigError, SessionSettings};
use crate::credential::Credential;
use crate::transport::socket::SocketTransport;
use crate::transport::{ReconnectPolicy, TransportError};

/// A conversation opened through a [`ClientSession`].
pub type Conversation = ChatSession<SocketTransport, HttpApi>;

/// Errors raised while logging in.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Required settings are missing.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The REST client could not be built.
    #[error("api error: {0}")]
    Api(#[from] ApiError),

    /// The socket could not be set up.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

/// The logged-in user's connection context.
pub struct ClientSession {
    user_id: UserId,
    profile: Option<SenderProfile>,
    transport: Arc<SocketTransport>,
    api: Arc<HttpApi>,
    sync: SyncConfig,
}

impl ClientSession {
    /// Build the REST client and start connecting the socket.
    ///
    /// Returns as soon as the socket supervisor is running; watch
    /// [`transport`](Self::transport) for connectivity.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] if a URL or the credential is unusable.
    pub fn login(
        api_url: &str,
        socket_url: &str,
        credential: &Credential,
        user_id: UserId,
        options: LoginOptions,
    ) -> Result<Self, SessionError> {
        let api = HttpApi::new(api_url, credential.clone(), options.request_timeout)?;
        let transport = SocketTransport::new(socket_url, options.reconnect)?;
        transport.connect(credential)?;
        tracing::info!(user = %user_id, "logged in");
        Ok(Self {
            user_id,
            profile: None,
            transport: Arc::new(transport),
            api: Arc::new(api),
            sync: options.sync,
        })
    }

    /// [`login`](Self::login) from resolved settings.
    ///
    /// # Errors
    ///
    /// Same as [`login`](Self::login).
    pub fn login_with(settings: &SessionSettings, options: LoginOptions) -> Result<Self, SessionError> {
        Self::login(
            &settings.api_url,
            &settings.socket_url,
            &Credential::new(settings.token.clone()),
            UserId::new(settings.user_id.clone()),
            options,
        )
    }

    /// Display fields stamped on our provisional records.
    #[must_use]
    pub fn with_profile(mut self, profile: SenderProfile) -> Self {
        self.profile = Some(profile);
        self
    }

    /// Open the conversation with `other`.
    ///
    /// The session is returned even if the history fetch fails (for example
    /// while offline); live events and sends work regardless and the failure
    /// is logged.
    pub async fn open_conversation(
        &self,
        other: UserId,
    ) -> (Arc<Conversation>, mpsc::Receiver<ChatEvent>) {
        let (conversation, events) = ChatSession::new(
            Arc::clone(&self.transport),
            Arc::clone(&self.api),
            ConversationScope::new(self.user_id.clone(), other),
            self.profile.clone(),
            self.sync.clone(),
        );
        if let Err(e) = conversation.open().await {
            tracing::warn!(error = %e, "history unavailable, continuing with live events");
        }
        (conversation, events)
    }

    /// Swap in a refreshed credential and reconnect the socket with it.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidCredential`] if the token cannot be
    /// sent as a header.
    pub fn refresh_credential(&self, credential: &Credential) -> Result<(), TransportError> {
        self.api.set_credential(credential.clone());
        self.transport.connect(credential)
    }

    /// The logged-in user.
    #[must_use]
    pub const fn user_id(&self) -> &UserId {
        &self.user_id
    }

    /// The shared socket transport.
    #[must_use]
    pub const fn transport(&self) -> &Arc<SocketTransport> {
        &self.transport
    }

    /// Disconnect the socket. Open conversations stop receiving events.
    pub fn logout(self) {
        self.transport.disconnect();
        tracing::info!(user = %self.user_id, "logged out");
    }
}

/// Tunables applied at login.
#[derive(Debug, Clone)]
pub struct LoginOptions {
    /// Timeout applied to every REST request.
    pub request_timeout: Duration,
    /// Socket reconnection policy.
    pub reconnect: ReconnectPolicy,
    /// Send pipeline and retry timings.
    pub sync: SyncConfig,
}

impl Default for LoginOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            reconnect: ReconnectPolicy::default(),
            sync: SyncConfig::default(),
        }
    }
}

impl From<&crate::config::ClientConfig> for LoginOptions {
    fn from(config: &crate::config::ClientConfig) -> Self {
        Self {
            request_timeout: config.request_timeout,
            reconnect: config.reconnect,
            sync: config.sync.clone(),
        }
    }
}
