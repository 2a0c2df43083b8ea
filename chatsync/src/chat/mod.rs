//! Conversation layer for `ChatSync`.
//!
//! A [`ChatSession`] owns the state of one open conversation: the
//! [`MessageStore`](store::MessageStore), the [`RetryQueue`](retry::RetryQueue)
//! and the listener registrations on the shared transport. It runs the
//! optimistic send pipeline (see [`send`]), folds inbound socket events into
//! the store after scoping them to the conversation, and drains the retry
//! queue whenever connectivity comes back.
//!
//! UI-facing changes are reported as [`ChatEvent`]s on a bounded channel.

pub mod retry;
pub mod scope;
pub mod send;
pub mod store;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use chatsync_proto::api::UserSummary;
use chatsync_proto::events::{ClientEvent, ConversationRef, EventKind, ReadReceipt, ServerEvent};
use chatsync_proto::message::{Message, MessageId, MessageStatus, SenderProfile};

use crate::api::{ApiError, MessagesApi};
use crate::transport::{Subscription, Transport};

use retry::RetryQueue;
use scope::ConversationScope;
use store::{InboundOutcome, MessageStore};

pub use retry::DrainReport;
pub use send::{SendError, SendOutcome};

/// Timing knobs of the sync core.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// How long a socket send waits for `message-sent` before falling back to REST.
    pub send_timeout: Duration,
    /// How long a provisional record stays visible after a network failure.
    pub failure_grace: Duration,
    /// Pause after reconnecting before the retry queue is replayed.
    pub retry_settle: Duration,
    /// Two durable records of our own with equal content closer than this
    /// are treated as one send delivered twice.
    pub echo_window: Duration,
    /// Capacity of the [`ChatEvent`] channel.
    pub event_buffer: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            send_timeout: Duration::from_secs(5),
            failure_grace: Duration::from_secs(2),
            retry_settle: Duration::from_secs(1),
            echo_window: Duration::from_secs(10),
            event_buffer: 64,
        }
    }
}

/// Non-blocking and blocking notices for the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// A send failed for lack of connectivity and will be replayed on reconnect.
    QueuedForRetry {
        /// The queued text.
        content: String,
    },
    /// The server refused a send; the draft should be restored for editing.
    SendRejected {
        /// The refused text.
        content: String,
        /// Why it was refused.
        reason: String,
    },
}

/// Events emitted by a [`ChatSession`] for UI notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    /// A provisional record was added for an outgoing message.
    MessagePending(Message),
    /// A message arrived (or an existing one was updated) from the transport.
    MessageReceived(Message),
    /// A provisional record was replaced by its durable confirmation.
    MessageConfirmed {
        /// The provisional id that disappeared.
        provisional_id: MessageId,
        /// The durable record now shown in its place.
        message: Message,
    },
    /// A record was removed (failed send after the grace period, or rejection).
    MessageRemoved(MessageId),
    /// Delivery status changed for some of our own messages.
    StatusChanged {
        /// The affected messages.
        message_ids: Vec<MessageId>,
        /// The new status.
        status: MessageStatus,
    },
    /// History was fetched and replaced the store contents.
    HistoryLoaded {
        /// Number of records loaded.
        count: usize,
        /// Profile of the other party, if the backend sent one.
        other_user: Option<UserSummary>,
    },
    /// Something the user should be told about.
    Notice(Notice),
    /// The transport connectivity signal flipped.
    ConnectionChanged(bool),
}

/// One open conversation on a shared transport.
pub struct ChatSession<T: Transport + 'static, A: MessagesApi + 'static> {
    transport: Arc<T>,
    api: Arc<A>,
    scope: ConversationScope,
    /// Display fields stamped on provisional records.
    profile: Option<SenderProfile>,
    config: SyncConfig,
    store: Mutex<MessageStore>,
    retry: RetryQueue,
    /// Provisional ids whose send is currently running. Lock after `store`.
    in_flight: Mutex<HashSet<MessageId>>,
    event_tx: mpsc::Sender<ChatEvent>,
    subscriptions: Mutex<Vec<Subscription>>,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Transport + 'static, A: MessagesApi + 'static> ChatSession<T, A> {
    /// Create a closed session. Call [`open`](Self::open) to start syncing.
    #[must_use]
    pub fn new(
        transport: Arc<T>,
        api: Arc<A>,
        scope: ConversationScope,
        profile: Option<SenderProfile>,
        config: SyncConfig,
    ) -> (Arc<Self>, mpsc::Receiver<ChatEvent>) {
        let (event_tx, event_rx) = mpsc::channel(config.event_buffer.max(1));
        let store = MessageStore::new(scope.current_user.clone());
        let session = Arc::new(Self {
            transport,
            api,
            scope,
            profile,
            config,
            store: Mutex::new(store),
            retry: RetryQueue::new(),
            in_flight: Mutex::new(HashSet::new()),
            event_tx,
            subscriptions: Mutex::new(Vec::new()),
            watcher: Mutex::new(None),
        });
        (session, event_rx)
    }

    /// Join the conversation and load its history.
    ///
    /// Registers the inbound listeners, emits `join-conversation`, starts the
    /// reconnect watcher, fetches history and marks the conversation read.
    /// Returns the number of records loaded.
    ///
    /// # Errors
    ///
    /// Returns the [`ApiError`] of the history fetch. Listeners and the
    /// watcher stay active in that case, so live messages still arrive.
    pub async fn open(self: &Arc<Self>) -> Result<usize, ApiError> {
        self.attach_listeners();
        self.transport
            .emit(ClientEvent::JoinConversation(self.conversation_ref()));
        self.spawn_watcher();
        tracing::info!(other = %self.scope.other_user, "conversation opened");
        self.load_history().await
    }

    /// Re-fetch history and replace the store contents.
    ///
    /// # Errors
    ///
    /// Returns the [`ApiError`] of the fetch; the store is left untouched.
    pub async fn load_history(&self) -> Result<usize, ApiError> {
        let history = self.api.conversation(&self.scope.other_user).await?;
        let count = self.store.lock().replace_all(history.messages);
        tracing::debug!(count, "history loaded");
        self.emit_event(ChatEvent::HistoryLoaded {
            count,
            other_user: history.other_user,
        });
        self.mark_conversation_read().await;
        Ok(count)
    }

    /// Leave the conversation: emit `leave-conversation`, drop every listener,
    /// stop the reconnect watcher.
    pub fn close(&self) {
        self.transport
            .emit(ClientEvent::LeaveConversation(self.conversation_ref()));
        self.subscriptions.lock().clear();
        if let Some(handle) = self.watcher.lock().take() {
            handle.abort();
        }
        tracing::info!(other = %self.scope.other_user, "conversation closed");
    }

    /// Copy of the store contents in display order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Message> {
        self.store.lock().messages().to_vec()
    }

    /// The retry queue.
    #[must_use]
    pub const fn retry_queue(&self) -> &RetryQueue {
        &self.retry
    }

    #[must_use]
    pub const fn scope(&self) -> &ConversationScope {
        &self.scope
    }

    #[must_use]
    pub const fn config(&self) -> &SyncConfig {
        &self.config
    }

    fn conversation_ref(&self) -> ConversationRef {
        ConversationRef {
            other_user_id: self.scope.other_user.clone(),
        }
    }

    fn emit_event(&self, event: ChatEvent) {
        let _ = self.event_tx.try_send(event);
    }

    fn attach_listeners(self: &Arc<Self>) {
        let mut subscriptions = Vec::with_capacity(3);
        for kind in [EventKind::ReceiveMessage, EventKind::NewMessage] {
            let weak = Arc::downgrade(self);
            subscriptions.push(self.transport.on(kind, move |event| {
                if let (Some(session), ServerEvent::ReceiveMessage(m) | ServerEvent::NewMessage(m)) =
                    (weak.upgrade(), event)
                {
                    session.apply_inbound_message(m.clone());
                }
            }));
        }
        let weak = Arc::downgrade(self);
        subscriptions.push(self.transport.on(EventKind::MessagesRead, move |event| {
            if let (Some(session), ServerEvent::MessagesRead(receipt)) = (weak.upgrade(), event) {
                session.apply_read_receipt(receipt);
            }
        }));
        *self.subscriptions.lock() = subscriptions;
    }

    fn apply_inbound_message(self: &Arc<Self>, message: Message) {
        if !self.scope.admits(&message) {
            tracing::debug!(id = %message.id, "message outside conversation, dropping");
            return;
        }
        let from_other = self.scope.is_from_other(&message);
        let outcome = self
            .store
            .lock()
            .apply_inbound(message.clone(), self.config.echo_window);
        match outcome {
            InboundOutcome::Updated | InboundOutcome::Appended => {
                self.emit_event(ChatEvent::MessageReceived(message));
            }
            InboundOutcome::ReplacedProvisional(provisional_id) => {
                tracing::debug!(id = %message.id, provisional = %provisional_id, "echo confirmed provisional record");
                let idle = !self.in_flight.lock().contains(&provisional_id);
                if idle && self.retry.remove(&message.content) {
                    tracing::debug!(id = %message.id, "echoed send removed from retry queue");
                }
                self.emit_event(ChatEvent::MessageConfirmed {
                    provisional_id,
                    message,
                });
            }
            InboundOutcome::DroppedEcho => {
                tracing::debug!(id = %message.id, "duplicate echo of own message dropped");
            }
        }
        if from_other {
            self.schedule_mark_read();
        }
    }

    fn apply_read_receipt(&self, receipt: &ReadReceipt) {
        if !self.scope.admits_receipt(receipt) {
            tracing::debug!(read_by = %receipt.read_by, "read receipt outside conversation, dropping");
            return;
        }
        let changed = self
            .store
            .lock()
            .mark_read(&receipt.messages, &receipt.read_by);
        if !changed.is_empty() {
            tracing::debug!(count = changed.len(), "messages read");
            self.emit_event(ChatEvent::StatusChanged {
                message_ids: changed,
                status: MessageStatus::Read,
            });
        }
    }

    /// Tell the server (socket and REST) that we have seen the conversation.
    async fn mark_conversation_read(&self) {
        self.transport
            .emit(ClientEvent::MarkAsRead(self.conversation_ref()));
        if let Err(e) = self.api.mark_read(&self.scope.other_user).await {
            tracing::warn!(error = %e, "failed to mark conversation read");
        }
    }

    fn schedule_mark_read(self: &Arc<Self>) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::debug!("no runtime, skipping mark-as-read");
            return;
        };
        let session = Arc::clone(self);
        runtime.spawn(async move {
            session.mark_conversation_read().await;
        });
    }

    /// Watch the connectivity signal; on every false->true transition rejoin
    /// the conversation and drain the retry queue.
    fn spawn_watcher(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let mut signal = self.transport.connectivity();
        let handle = tokio::spawn(async move {
            let mut was_connected = *signal.borrow_and_update();
            while signal.changed().await.is_ok() {
                let connected = *signal.borrow_and_update();
                if connected == was_connected {
                    continue;
                }
                was_connected = connected;
                let Some(session) = weak.upgrade() else {
                    break;
                };
                session.emit_event(ChatEvent::ConnectionChanged(connected));
                if connected {
                    tracing::info!(queued = session.retry.len(), "connection restored");
                    session
                        .transport
                        .emit(ClientEvent::JoinConversation(session.conversation_ref()));
                    tokio::spawn(async move {
                        session.drain_retry_queue().await;
                    });
                } else {
                    tracing::info!("connection lost");
                }
            }
        });
        if let Some(previous) = self.watcher.lock().replace(handle) {
            previous.abort();
        }
    }
}

impl<T: Transport + 'static, A: MessagesApi + 'static> Drop for ChatSession<T, A> {
    fn drop(&mut self) {
        if let Some(handle) = self.watcher.lock().take() {
            handle.abort();
        }
    }
}
