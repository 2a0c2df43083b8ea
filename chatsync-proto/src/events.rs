//! Socket event types.
//!
//! Every frame on the socket is a JSON text frame of the form
//! `{"event": "<name>", "data": <payload>}`. [`ClientEvent`] covers frames the
//! client emits, [`ServerEvent`] covers frames the backend pushes.

use serde::{Deserialize, Serialize};

use crate::message::{Message, MessageId, UserId};

/// Payload of `send-message`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessagePayload {
    /// Recipient of the message.
    pub receiver_id: UserId,
    /// Text body.
    pub content: String,
}

/// Payload naming the other party of a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationRef {
    /// The other participant.
    pub other_user_id: UserId,
}

/// Payload of `message-error`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Human-readable reason.
    pub error: String,
}

/// Payload of `messages-read`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadReceipt {
    /// Identifiers of the messages that were read.
    pub messages: Vec<MessageId>,
    /// The user who read them.
    pub read_by: UserId,
}

/// Frames emitted by the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
    /// Ask the backend to persist and forward a message.
    SendMessage(SendMessagePayload),
    /// Subscribe to a conversation's room.
    JoinConversation(ConversationRef),
    /// Unsubscribe from a conversation's room.
    LeaveConversation(ConversationRef),
    /// Mark every message from the other party as read.
    MarkAsRead(ConversationRef),
}

impl ClientEvent {
    /// Returns the wire name of this event.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::SendMessage(_) => "send-message",
            Self::JoinConversation(_) => "join-conversation",
            Self::LeaveConversation(_) => "leave-conversation",
            Self::MarkAsRead(_) => "mark-as-read",
        }
    }
}

/// Frames pushed by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    /// Confirmation of a `send-message`, carrying the durable record.
    MessageSent(Message),
    /// Rejection of a `send-message`.
    MessageError(ErrorPayload),
    /// A message addressed to this user.
    ReceiveMessage(Message),
    /// A message broadcast to a conversation room.
    NewMessage(Message),
    /// Read receipt for messages this user sent.
    MessagesRead(ReadReceipt),
}

impl ServerEvent {
    /// Returns the discriminant used for listener registration.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::MessageSent(_) => EventKind::MessageSent,
            Self::MessageError(_) => EventKind::MessageError,
            Self::ReceiveMessage(_) => EventKind::ReceiveMessage,
            Self::NewMessage(_) => EventKind::NewMessage,
            Self::MessagesRead(_) => EventKind::MessagesRead,
        }
    }
}

/// Discriminant of [`ServerEvent`], used to register typed listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// `message-sent`
    MessageSent,
    /// `message-error`
    MessageError,
    /// `receive-message`
    ReceiveMessage,
    /// `new-message`
    NewMessage,
    /// `messages-read`
    MessagesRead,
}

impl EventKind {
    /// Returns the wire name of this event.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::MessageSent => "message-sent",
            Self::MessageError => "message-error",
            Self::ReceiveMessage => "receive-message",
            Self::NewMessage => "new-message",
            Self::MessagesRead => "messages-read",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
