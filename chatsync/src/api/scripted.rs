//! In-memory [`MessagesApi`] for tests and offline demos.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;

use chatsync_proto::api::ConversationHistory;
use chatsync_proto::message::{Message, MessageId, MessageStatus, UserId};

use super::{ApiError, MessagesApi};

/// Scriptable REST stand-in.
///
/// By default `send_message` succeeds and echoes a durable record with id
/// `srv-<n>`. Tests can queue one-shot failures, switch the whole API
/// offline, or add latency.
pub struct ScriptedApi {
    owner: UserId,
    offline: AtomicBool,
    failures: Mutex<VecDeque<ApiError>>,
    latency: Mutex<Duration>,
    next_id: AtomicU64,
    sent: Mutex<Vec<(UserId, String)>>,
    history: Mutex<ConversationHistory>,
    read_marks: Mutex<Vec<UserId>>,
}

impl ScriptedApi {
    /// Create an online API acting on behalf of `owner`.
    #[must_use]
    pub fn new(owner: UserId) -> Self {
        Self {
            owner,
            offline: AtomicBool::new(false),
            failures: Mutex::new(VecDeque::new()),
            latency: Mutex::new(Duration::ZERO),
            next_id: AtomicU64::new(1),
            sent: Mutex::new(Vec::new()),
            history: Mutex::new(ConversationHistory {
                messages: Vec::new(),
                other_user: None,
            }),
            read_marks: Mutex::new(Vec::new()),
        }
    }

    /// While offline every call fails with [`ApiError::Network`].
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Make the next `send_message` fail with `err`.
    pub fn fail_next_send(&self, err: ApiError) {
        self.failures.lock().push_back(err);
    }

    /// Delay every call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    /// History returned by `conversation`.
    pub fn set_history(&self, history: ConversationHistory) {
        *self.history.lock() = history;
    }

    /// `(receiver, content)` of every send that reached the API, successful or not.
    pub fn sent(&self) -> Vec<(UserId, String)> {
        self.sent.lock().clone()
    }

    /// Conversations marked read, in call order.
    pub fn read_marks(&self) -> Vec<UserId> {
        self.read_marks.lock().clone()
    }

    async fn pause(&self) {
        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }

    fn check_online(&self) -> Result<(), ApiError> {
        if self.offline.load(Ordering::SeqCst) {
            Err(ApiError::Network("offline".into()))
        } else {
            Ok(())
        }
    }
}

impl MessagesApi for ScriptedApi {
    async fn send_message(&self, receiver: &UserId, content: &str) -> Result<Message, ApiError> {
        self.pause().await;
        self.sent.lock().push((receiver.clone(), content.to_string()));
        self.check_online()?;
        if let Some(err) = self.failures.lock().pop_front() {
            return Err(err);
        }
        let n = self.next_id.fetch_add(1, Ordering::Relaxed);
        Ok(Message {
            id: MessageId::new(format!("srv-{n}")),
            sender_id: self.owner.clone(),
            receiver_id: receiver.clone(),
            content: content.to_string(),
            status: MessageStatus::Sent,
            created_at: Utc::now(),
            sender: None,
        })
    }

    async fn conversation(&self, _other: &UserId) -> Result<ConversationHistory, ApiError> {
        self.pause().await;
        self.check_online()?;
        Ok(self.history.lock().clone())
    }

    async fn mark_read(&self, other: &UserId) -> Result<(), ApiError> {
        self.pause().await;
        self.check_online()?;
        self.read_marks.lock().push(other.clone());
        Ok(())
    }
}
