//! Optimistic send pipeline.
//!
//! `submit` walks one message through
//! Drafting -> Provisional -> Transmitting -> Fallback -> Confirmed | Failed:
//!
//! 1. The text is trimmed; empty text is refused before anything is stored.
//! 2. A provisional `temp-` record is shown immediately. At most one
//!    provisional record exists per (sender, content): an in-flight one
//!    absorbs the submit, an idle one (failure grace period) is reused.
//! 3. `send-message` is emitted and the matching `message-sent` /
//!    `message-error` is raced against `send_timeout`.
//! 4. Anything but a confirmation falls back to `POST /messages/send`.
//! 5. A durable record replaces the provisional one in place.
//! 6. Network failures queue the text for retry and leave the provisional
//!    record visible for `failure_grace`; any other failure removes it and
//!    hands the draft back to the caller.

use std::sync::Arc;

use chatsync_proto::events::{ClientEvent, EventKind, SendMessagePayload, ServerEvent};
use chatsync_proto::message::{Message, MessageId};

use super::{ChatEvent, ChatSession, Notice};
use crate::api::{ApiError, MessagesApi};
use crate::transport::{EventStream, Transport, TransportError};

/// Errors returned to the composer.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    /// Nothing to send after trimming.
    #[error("message is empty")]
    EmptyMessage,

    /// The server refused the message. `draft` is the text as typed, for
    /// restoring into the composer.
    #[error("message rejected: {reason}")]
    Rejected {
        /// Original input text.
        draft: String,
        /// Why the server refused it.
        reason: ApiError,
    },
}

/// How a submit ended when it did not fail outright.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// The server confirmed the message; this is the durable record.
    Confirmed(Message),
    /// An identical message is already being sent; nothing was transmitted.
    AlreadyPending(MessageId),
    /// Delivery failed for lack of connectivity; the text is in the retry queue.
    Queued {
        /// The provisional record shown during the grace period.
        provisional_id: MessageId,
    },
}

/// Whether a submit comes from the user or from the retry queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Attempt {
    Fresh,
    Replay,
}

/// Result of claiming the provisional slot for some content.
enum Claim {
    /// A send of this content is running already.
    InFlight(MessageId),
    /// An idle provisional record was picked up again.
    Reused(MessageId),
    /// A new provisional record was inserted.
    Created(Message),
}

impl<T: Transport + 'static, A: MessagesApi + 'static> ChatSession<T, A> {
    /// Send `text` to the other party.
    ///
    /// # Errors
    ///
    /// [`SendError::EmptyMessage`] for blank input, [`SendError::Rejected`]
    /// when the server refuses the message. Connectivity failures are not
    /// errors: they yield [`SendOutcome::Queued`].
    pub async fn send(self: &Arc<Self>, text: &str) -> Result<SendOutcome, SendError> {
        self.submit(text, Attempt::Fresh).await
    }

    pub(crate) async fn submit(
        self: &Arc<Self>,
        text: &str,
        attempt: Attempt,
    ) -> Result<SendOutcome, SendError> {
        let content = text.trim();
        if content.is_empty() {
            return Err(SendError::EmptyMessage);
        }

        let provisional_id = match self.claim_provisional(content) {
            Claim::InFlight(id) => {
                tracing::debug!(provisional = %id, ?attempt, "identical send in flight, skipping");
                return Ok(SendOutcome::AlreadyPending(id));
            }
            Claim::Reused(id) => id,
            Claim::Created(record) => {
                let id = record.id.clone();
                self.emit_event(ChatEvent::MessagePending(record));
                id
            }
        };

        let result = self.transmit(content).await;
        let outcome = match result {
            Ok(durable) => {
                self.confirm(durable.clone(), &provisional_id);
                Ok(SendOutcome::Confirmed(durable))
            }
            Err(err) if err.is_network() => {
                self.retry.enqueue(content);
                match attempt {
                    Attempt::Fresh => {
                        tracing::warn!(error = %err, "send failed, queued for retry");
                        self.emit_event(ChatEvent::Notice(Notice::QueuedForRetry {
                            content: content.to_string(),
                        }));
                    }
                    Attempt::Replay => {
                        tracing::debug!(error = %err, "replay failed, re-queued");
                    }
                }
                self.schedule_discard(provisional_id.clone());
                Ok(SendOutcome::Queued {
                    provisional_id: provisional_id.clone(),
                })
            }
            Err(err) => {
                tracing::warn!(error = %err, ?attempt, "send rejected");
                if self.store.lock().remove(&provisional_id).is_some() {
                    self.emit_event(ChatEvent::MessageRemoved(provisional_id.clone()));
                }
                self.emit_event(ChatEvent::Notice(Notice::SendRejected {
                    content: content.to_string(),
                    reason: err.to_string(),
                }));
                Err(SendError::Rejected {
                    draft: text.to_string(),
                    reason: err,
                })
            }
        };
        self.in_flight.lock().remove(&provisional_id);
        outcome
    }

    fn claim_provisional(&self, content: &str) -> Claim {
        let mut store = self.store.lock();
        let mut in_flight = self.in_flight.lock();
        if let Some(existing) = store.find_provisional(&self.scope.current_user, content) {
            let id = existing.id.clone();
            if in_flight.contains(&id) {
                return Claim::InFlight(id);
            }
            in_flight.insert(id.clone());
            return Claim::Reused(id);
        }
        let record = Message::provisional(
            self.scope.current_user.clone(),
            self.scope.other_user.clone(),
            content,
            self.profile.clone(),
        );
        store.insert_or_update(record.clone());
        in_flight.insert(record.id.clone());
        Claim::Created(record)
    }

    /// Socket first, REST on anything but a confirmation.
    async fn transmit(&self, content: &str) -> Result<Message, ApiError> {
        match self.send_over_socket(content).await {
            Ok(durable) => return Ok(durable),
            Err(e) => {
                tracing::debug!(error = %e, "socket send not confirmed, falling back to REST");
            }
        }
        self.api
            .send_message(&self.scope.other_user, content)
            .await
    }

    async fn send_over_socket(&self, content: &str) -> Result<Message, TransportError> {
        let mut replies = EventStream::subscribe(
            self.transport.as_ref(),
            &[EventKind::MessageSent, EventKind::MessageError],
        );
        self.transport
            .emit(ClientEvent::SendMessage(SendMessagePayload {
                receiver_id: self.scope.other_user.clone(),
                content: content.to_string(),
            }));

        let me = &self.scope.current_user;
        let other = &self.scope.other_user;
        let confirmation = async {
            while let Some(event) = replies.next().await {
                match event {
                    ServerEvent::MessageSent(m)
                        if m.sender_id == *me && m.receiver_id == *other && m.content == content =>
                    {
                        return Ok(m);
                    }
                    ServerEvent::MessageError(e) => return Err(TransportError::Rejected(e.error)),
                    _ => {}
                }
            }
            Err(TransportError::ConnectionClosed)
        };
        tokio::time::timeout(self.config.send_timeout, confirmation)
            .await
            .map_err(|_| TransportError::Timeout)?
    }

    fn confirm(&self, durable: Message, provisional_id: &MessageId) {
        let visible =
            self.store
                .lock()
                .reconcile(durable.clone(), provisional_id, self.config.echo_window);
        tracing::info!(id = %durable.id, provisional = %provisional_id, "message confirmed");
        if visible {
            self.emit_event(ChatEvent::MessageConfirmed {
                provisional_id: provisional_id.clone(),
                message: durable,
            });
        } else {
            self.emit_event(ChatEvent::MessageRemoved(provisional_id.clone()));
        }
    }

    /// Remove the provisional record after the grace period unless a retry
    /// picked it up in the meantime.
    fn schedule_discard(self: &Arc<Self>, provisional_id: MessageId) {
        let weak = Arc::downgrade(self);
        let grace = self.config.failure_grace;
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            if let Some(session) = weak.upgrade() {
                session.discard_if_idle(&provisional_id);
            }
        });
    }

    fn discard_if_idle(&self, provisional_id: &MessageId) {
        let removed = {
            let mut store = self.store.lock();
            let in_flight = self.in_flight.lock();
            !in_flight.contains(provisional_id) && store.remove(provisional_id).is_some()
        };
        if removed {
            tracing::debug!(provisional = %provisional_id, "grace period over, provisional removed");
            self.emit_event(ChatEvent::MessageRemoved(provisional_id.clone()));
        }
    }
}
