//! Ordered, duplicate-free message collection for one conversation.
//!
//! Records are keyed by [`MessageId`]. Every mutation leaves the store free
//! of duplicate identifiers; provisional records are additionally unique per
//! (sender, content).

use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

use chatsync_proto::message::{Message, MessageId, MessageStatus, UserId};

/// What [`MessageStore::apply_inbound`] did with an inbound record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundOutcome {
    /// A record with the same id existed and was replaced in place.
    Updated,
    /// The record was new and appended.
    Appended,
    /// The record confirmed one of our own provisional sends, which it replaced.
    ReplacedProvisional(MessageId),
    /// The record duplicated a recent durable copy of our own send.
    DroppedEcho,
}

/// Message records of one conversation, in display order.
#[derive(Debug, Clone)]
pub struct MessageStore {
    owner: UserId,
    messages: Vec<Message>,
}

impl MessageStore {
    /// Create an empty store for the conversation seen by `owner`.
    #[must_use]
    pub const fn new(owner: UserId) -> Self {
        Self {
            owner,
            messages: Vec::new(),
        }
    }

    /// The current user.
    #[must_use]
    pub const fn owner(&self) -> &UserId {
        &self.owner
    }

    /// All records in display order.
    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    #[must_use]
    pub fn contains(&self, id: &MessageId) -> bool {
        self.position(id).is_some()
    }

    #[must_use]
    pub fn get(&self, id: &MessageId) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == *id)
    }

    fn position(&self, id: &MessageId) -> Option<usize> {
        self.messages.iter().position(|m| m.id == *id)
    }

    /// Replace the record with the same id in place, or append.
    ///
    /// Returns `true` if the record was appended. Inserting the same record
    /// twice leaves the store unchanged the second time.
    pub fn insert_or_update(&mut self, message: Message) -> bool {
        if let Some(pos) = self.position(&message.id) {
            self.messages[pos] = message;
            false
        } else {
            self.messages.push(message);
            true
        }
    }

    /// Replace the whole collection with a fetched history.
    pub fn replace_all(&mut self, history: Vec<Message>) -> usize {
        self.messages = deduplicate(history);
        self.messages.len()
    }

    /// The provisional record for `(sender, content)`, if one exists.
    #[must_use]
    pub fn find_provisional(&self, sender: &UserId, content: &str) -> Option<&Message> {
        self.messages
            .iter()
            .find(|m| m.is_provisional() && m.sender_id == *sender && m.content == content)
    }

    /// Remove a record by id.
    pub fn remove(&mut self, id: &MessageId) -> Option<Message> {
        let pos = self.position(id)?;
        Some(self.messages.remove(pos))
    }

    /// Apply a read receipt.
    ///
    /// Only records sent by the owner change; a receipt issued by the owner
    /// is ignored. Returns the ids whose status actually changed.
    pub fn mark_read(&mut self, ids: &[MessageId], read_by: &UserId) -> Vec<MessageId> {
        if *read_by == self.owner {
            return Vec::new();
        }
        let wanted: HashSet<&MessageId> = ids.iter().collect();
        let mut changed = Vec::new();
        for message in &mut self.messages {
            if message.sender_id == self.owner
                && message.status != MessageStatus::Read
                && wanted.contains(&message.id)
            {
                message.status = MessageStatus::Read;
                changed.push(message.id.clone());
            }
        }
        changed
    }

    /// Swap a provisional record for its durable confirmation.
    ///
    /// The durable record takes the provisional one's position. If the
    /// durable id is already present (an inbound echo beat the confirmation)
    /// that copy is updated instead. If the provisional record is gone and a
    /// durable copy of the same content arrived within `echo_window`, nothing
    /// is added. Returns `true` if the durable record is visible afterwards.
    pub fn reconcile(
        &mut self,
        durable: Message,
        provisional_id: &MessageId,
        echo_window: Duration,
    ) -> bool {
        let slot = self.position(provisional_id);
        if let Some(pos) = slot {
            self.messages.remove(pos);
        }

        if let Some(pos) = self.position(&durable.id) {
            self.messages[pos] = durable;
        } else if let Some(pos) = slot {
            self.messages.insert(pos, durable);
        } else if self.has_recent_copy(&durable, echo_window) {
            tracing::debug!(id = %durable.id, "late confirmation already visible, skipping");
            return false;
        } else {
            self.messages.push(durable);
        }

        self.dedupe_in_place();
        true
    }

    /// Fold a message delivered by the transport into the store.
    pub fn apply_inbound(&mut self, message: Message, echo_window: Duration) -> InboundOutcome {
        if let Some(pos) = self.position(&message.id) {
            self.messages[pos] = message;
            return InboundOutcome::Updated;
        }

        if message.sender_id == self.owner {
            let provisional = self.messages.iter().position(|m| {
                m.is_provisional() && m.sender_id == self.owner && m.content == message.content
            });
            if let Some(pos) = provisional {
                let replaced = std::mem::replace(&mut self.messages[pos], message);
                return InboundOutcome::ReplacedProvisional(replaced.id);
            }
            if self.has_recent_copy(&message, echo_window) {
                return InboundOutcome::DroppedEcho;
            }
        }

        self.messages.push(message);
        InboundOutcome::Appended
    }

    /// Whether a durable record from `sender` with this `content` exists
    /// within `window` of `at`.
    #[must_use]
    pub fn has_recent_copy_of(
        &self,
        sender: &UserId,
        content: &str,
        at: DateTime<Utc>,
        window: Duration,
    ) -> bool {
        let window = TimeDelta::from_std(window).unwrap_or(TimeDelta::MAX);
        self.messages.iter().any(|m| {
            !m.is_provisional()
                && m.sender_id == *sender
                && m.content == content
                && (m.created_at - at).abs() <= window
        })
    }

    fn has_recent_copy(&self, message: &Message, window: Duration) -> bool {
        self.has_recent_copy_of(&message.sender_id, &message.content, message.created_at, window)
    }

    fn dedupe_in_place(&mut self) {
        let messages = std::mem::take(&mut self.messages);
        self.messages = deduplicate(messages);
    }
}

/// Keep the first occurrence of each id, preserving relative order.
#[must_use]
pub fn deduplicate(messages: Vec<Message>) -> Vec<Message> {
    let mut seen = HashSet::with_capacity(messages.len());
    messages
        .into_iter()
        .filter(|m| seen.insert(m.id.clone()))
        .collect()
}
