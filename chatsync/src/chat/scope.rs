//! Conversation filter for inbound transport events.
//!
//! The socket carries events for every conversation the user is part of; a
//! [`ChatSession`](super::ChatSession) only accepts the ones between its two
//! parties.

use chatsync_proto::events::ReadReceipt;
use chatsync_proto::message::{Message, UserId};

/// The (current user, other party) pair of an open conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationScope {
    /// The logged-in user.
    pub current_user: UserId,
    /// The other party.
    pub other_user: UserId,
}

impl ConversationScope {
    #[must_use]
    pub const fn new(current_user: UserId, other_user: UserId) -> Self {
        Self {
            current_user,
            other_user,
        }
    }

    /// `true` for messages from me to the other party or from them to me.
    #[must_use]
    pub fn admits(&self, message: &Message) -> bool {
        (message.sender_id == self.current_user && message.receiver_id == self.other_user)
            || (message.sender_id == self.other_user && message.receiver_id == self.current_user)
    }

    /// `true` if the other party issued the receipt.
    #[must_use]
    pub fn admits_receipt(&self, receipt: &ReadReceipt) -> bool {
        receipt.read_by == self.other_user
    }

    /// `true` if `message` was written by the other party.
    #[must_use]
    pub fn is_from_other(&self, message: &Message) -> bool {
        message.sender_id == self.other_user
    }
}
