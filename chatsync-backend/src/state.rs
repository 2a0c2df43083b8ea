//! Shared backend state: user registry, message log, and live socket
//! connections.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::extract::ws::Message as WsMessage;
use chrono::Utc;
use tokio::sync::{RwLock, mpsc};

use chatsync_proto::api::UserSummary;
use chatsync_proto::codec;
use chatsync_proto::events::ServerEvent;
use chatsync_proto::message::{Message, MessageId, MessageStatus, SenderProfile, UserId};

/// Errors raised by state operations.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum StateError {
    /// The message body was blank.
    #[error("message content is required")]
    EmptyContent,

    /// A user tried to message themselves.
    #[error("cannot send a message to yourself")]
    SelfMessage,
}

/// One open socket of a user.
struct Connection {
    id: u64,
    sender: mpsc::UnboundedSender<WsMessage>,
}

/// In-memory backend state.
pub struct BackendState {
    /// Bearer token -> user.
    tokens: HashMap<String, UserId>,
    /// Every message, in creation order.
    messages: RwLock<Vec<Message>>,
    next_message: AtomicU64,
    /// Open sockets per user. A user may be connected from several devices.
    connections: RwLock<HashMap<UserId, Vec<Connection>>>,
    next_connection: AtomicU64,
}

impl Default for BackendState {
    fn default() -> Self {
        Self::new()
    }
}

impl BackendState {
    /// Empty state with no registered users.
    #[must_use]
    pub fn new() -> Self {
        Self {
            tokens: HashMap::new(),
            messages: RwLock::new(Vec::new()),
            next_message: AtomicU64::new(1),
            connections: RwLock::new(HashMap::new()),
            next_connection: AtomicU64::new(1),
        }
    }

    /// Register `token` as the credential of `user`.
    #[must_use]
    pub fn with_user(mut self, token: impl Into<String>, user: impl Into<String>) -> Self {
        self.tokens.insert(token.into(), UserId::new(user));
        self
    }

    /// Resolve an `Authorization` header value (`Bearer <token>`) to a user.
    #[must_use]
    pub fn authenticate(&self, header: &str) -> Option<UserId> {
        let token = header.strip_prefix("Bearer ")?.trim();
        self.tokens.get(token).cloned()
    }

    /// Public profile of `user`. Users have no stored names; the id stands in.
    #[must_use]
    pub fn user_summary(&self, user: &UserId) -> UserSummary {
        UserSummary {
            id: user.clone(),
            first_name: user.to_string(),
            last_name: String::new(),
            profile_image: None,
        }
    }

    /// Persist a new message from `sender` to `receiver`.
    ///
    /// # Errors
    ///
    /// [`StateError::EmptyContent`] for blank content,
    /// [`StateError::SelfMessage`] if both parties are the same user.
    pub async fn store_message(
        &self,
        sender: &UserId,
        receiver: &UserId,
        content: &str,
    ) -> Result<Message, StateError> {
        if content.trim().is_empty() {
            return Err(StateError::EmptyContent);
        }
        if sender == receiver {
            return Err(StateError::SelfMessage);
        }
        let n = self.next_message.fetch_add(1, Ordering::Relaxed);
        let message = Message {
            id: MessageId::new(format!("msg-{n}")),
            sender_id: sender.clone(),
            receiver_id: receiver.clone(),
            content: content.to_string(),
            status: MessageStatus::Sent,
            created_at: Utc::now(),
            sender: Some(SenderProfile {
                first_name: sender.to_string(),
                last_name: String::new(),
                profile_image: None,
            }),
        };
        self.messages.write().await.push(message.clone());
        tracing::debug!(id = %message.id, from = %sender, to = %receiver, "message stored");
        Ok(message)
    }

    /// Messages exchanged between `me` and `other`, oldest first.
    pub async fn conversation(&self, me: &UserId, other: &UserId) -> Vec<Message> {
        self.messages
            .read()
            .await
            .iter()
            .filter(|m| {
                (m.sender_id == *me && m.receiver_id == *other)
                    || (m.sender_id == *other && m.receiver_id == *me)
            })
            .cloned()
            .collect()
    }

    /// Mark every message `other` sent to `reader` as read. Returns the ids
    /// that changed.
    pub async fn mark_read(&self, reader: &UserId, other: &UserId) -> Vec<MessageId> {
        let mut messages = self.messages.write().await;
        let mut changed = Vec::new();
        for message in messages.iter_mut() {
            if message.sender_id == *other
                && message.receiver_id == *reader
                && message.status != MessageStatus::Read
            {
                message.status = MessageStatus::Read;
                changed.push(message.id.clone());
            }
        }
        changed
    }

    /// Track a new socket for `user`. Returns its connection id.
    pub async fn register(&self, user: &UserId, sender: mpsc::UnboundedSender<WsMessage>) -> u64 {
        let id = self.next_connection.fetch_add(1, Ordering::Relaxed);
        self.connections
            .write()
            .await
            .entry(user.clone())
            .or_default()
            .push(Connection { id, sender });
        id
    }

    /// Forget one socket of `user`.
    pub async fn unregister(&self, user: &UserId, connection: u64) {
        let mut conns = self.connections.write().await;
        if let Some(list) = conns.get_mut(user) {
            list.retain(|c| c.id != connection);
            if list.is_empty() {
                conns.remove(user);
            }
        }
    }

    /// Number of open sockets of `user`.
    pub async fn connection_count(&self, user: &UserId) -> usize {
        self.connections
            .read()
            .await
            .get(user)
            .map_or(0, Vec::len)
    }

    /// Push `event` to every socket of `user`. Returns how many sockets got it.
    pub async fn send_to_user(&self, user: &UserId, event: &ServerEvent) -> usize {
        let frame = match codec::encode_server(event) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!(error = %e, "failed to encode server event");
                return 0;
            }
        };
        let conns = self.connections.read().await;
        let Some(list) = conns.get(user) else {
            tracing::debug!(user = %user, event = %event.kind(), "user offline, not pushed");
            return 0;
        };
        list.iter()
            .filter(|c| c.sender.send(WsMessage::Text(frame.clone().into())).is_ok())
            .count()
    }

    /// Send a close frame to every socket. Used for shutdown and tests.
    pub async fn close_all_connections(&self) {
        let conns = self.connections.read().await;
        for (user, list) in conns.iter() {
            tracing::info!(user = %user, sockets = list.len(), "closing connections");
            for c in list {
                let _ = c.sender.send(WsMessage::Close(None));
            }
        }
    }
}
