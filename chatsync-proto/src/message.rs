//! Message records exchanged with the marketplace backend.
//!
//! Field names follow the backend's JSON shape (camelCase). A [`Message`] is
//! either *durable* (carries a server-issued [`MessageId`]) or *provisional*
//! (carries a client-generated id with the [`PROVISIONAL_PREFIX`]).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Reserved prefix distinguishing client-generated ids from server-issued ones.
pub const PROVISIONAL_PREFIX: &str = "temp-";

/// Identifier of a message record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    /// Wraps a server-issued identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh provisional identifier (`temp-<uuid v7>`).
    #[must_use]
    pub fn provisional() -> Self {
        Self(format!("{PROVISIONAL_PREFIX}{}", Uuid::now_v7()))
    }

    /// Returns `true` if this id was generated client-side.
    #[must_use]
    pub fn is_provisional(&self) -> bool {
        self.0.starts_with(PROVISIONAL_PREFIX)
    }

    /// Returns the string form of the id.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a marketplace user (client or provider).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Wraps a user identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the string form of the id.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Delivery status of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageStatus {
    /// Accepted by the sender side (provisional or server-stored).
    Sent,
    /// Delivered to the receiver's device.
    Delivered,
    /// Read by the receiver.
    Read,
}

impl std::fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sent => write!(f, "SENT"),
            Self::Delivered => write!(f, "DELIVERED"),
            Self::Read => write!(f, "READ"),
        }
    }
}

/// Denormalized display fields of the sender, as embedded by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SenderProfile {
    /// Given name.
    #[serde(default)]
    pub first_name: String,
    /// Family name.
    #[serde(default)]
    pub last_name: String,
    /// Avatar URL, if the user uploaded one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_image: Option<String>,
}

impl SenderProfile {
    /// Returns "First Last", trimmed.
    #[must_use]
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }
}

/// A single chat message record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Durable or provisional identifier.
    pub id: MessageId,
    /// Author of the message.
    pub sender_id: UserId,
    /// Recipient of the message.
    pub receiver_id: UserId,
    /// Text body.
    pub content: String,
    /// Delivery status.
    pub status: MessageStatus,
    /// Creation time (server time for durable records, local time otherwise).
    pub created_at: DateTime<Utc>,
    /// Sender display fields, when the backend includes them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<SenderProfile>,
}

impl Message {
    /// Builds a provisional record for an outgoing message.
    ///
    /// The record is stamped with the local clock and status [`MessageStatus::Sent`].
    #[must_use]
    pub fn provisional(
        sender_id: UserId,
        receiver_id: UserId,
        content: impl Into<String>,
        sender: Option<SenderProfile>,
    ) -> Self {
        Self {
            id: MessageId::provisional(),
            sender_id,
            receiver_id,
            content: content.into(),
            status: MessageStatus::Sent,
            created_at: Utc::now(),
            sender,
        }
    }

    /// Returns `true` if this record has not been confirmed by the server.
    #[must_use]
    pub fn is_provisional(&self) -> bool {
        self.id.is_provisional()
    }
}
