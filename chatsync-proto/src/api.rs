//! Request and response bodies of the REST messaging endpoints.

use serde::{Deserialize, Serialize};

use crate::message::{Message, UserId};

/// Body of `POST /messages/send`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    /// Recipient of the message.
    pub receiver_id: UserId,
    /// Text body.
    pub content: String,
}

/// Public profile of the other party in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    /// User identifier.
    pub id: UserId,
    /// Given name.
    #[serde(default)]
    pub first_name: String,
    /// Family name.
    #[serde(default)]
    pub last_name: String,
    /// Avatar URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_image: Option<String>,
}

/// Response of `GET /messages/:otherUserId`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationHistory {
    /// Messages in chronological order.
    pub messages: Vec<Message>,
    /// The other party, when the backend knows them.
    #[serde(default)]
    pub other_user: Option<UserSummary>,
}

/// Error body returned by the backend on non-2xx responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Human-readable reason.
    pub error: String,
}
