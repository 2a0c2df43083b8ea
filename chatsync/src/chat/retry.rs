//! Queue of sends that failed for lack of connectivity.
//!
//! Entries are unique by content. The owning [`ChatSession`] drains the queue
//! on every reconnect; a flag keeps two drains from overlapping.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use super::ChatSession;
use super::send::{Attempt, SendOutcome};
use crate::api::MessagesApi;
use crate::transport::Transport;

/// One queued send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryEntry {
    /// Original text as submitted.
    pub content: String,
    /// When the send was first queued.
    pub enqueued_at: DateTime<Utc>,
}

/// FIFO of failed sends with idempotent enqueue.
#[derive(Debug, Default)]
pub struct RetryQueue {
    entries: Mutex<VecDeque<RetryEntry>>,
    draining: AtomicBool,
}

impl RetryQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `content` unless it is already queued. Returns `true` if added.
    pub fn enqueue(&self, content: &str) -> bool {
        let mut entries = self.entries.lock();
        if entries.iter().any(|e| e.content == content) {
            tracing::debug!(queued = entries.len(), "content already queued for retry");
            return false;
        }
        entries.push_back(RetryEntry {
            content: content.to_string(),
            enqueued_at: Utc::now(),
        });
        tracing::debug!(queued = entries.len(), "queued for retry");
        true
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Queued contents in enqueue order.
    #[must_use]
    pub fn contents(&self) -> Vec<String> {
        self.entries.lock().iter().map(|e| e.content.clone()).collect()
    }

    /// Drop the entry for `content`. Returns `true` if one was queued.
    pub fn remove(&self, content: &str) -> bool {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|e| e.content != content);
        entries.len() != before
    }

    /// Remove and return every entry, oldest first.
    pub fn take_all(&self) -> Vec<RetryEntry> {
        self.entries.lock().drain(..).collect()
    }

    /// Claim the drain flag. Returns `None` if a drain is already running.
    pub fn try_begin_drain(&self) -> Option<DrainGuard<'_>> {
        self.draining
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| DrainGuard { queue: self })
    }

    /// `true` while a drain holds the flag.
    #[must_use]
    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }
}

/// Releases the drain flag on drop.
#[must_use = "the drain flag is released when the guard is dropped"]
pub struct DrainGuard<'a> {
    queue: &'a RetryQueue,
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.queue.draining.store(false, Ordering::Release);
    }
}

/// Tally of one drain pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Entries the server confirmed.
    pub delivered: usize,
    /// Entries that failed on the network again and went back in the queue.
    pub requeued: usize,
    /// Entries the server refused; they are not retried.
    pub dropped: usize,
    /// Entries skipped because an identical send was already in flight.
    pub skipped: usize,
    /// Entries skipped because the server already echoed them back.
    pub already_delivered: usize,
}

impl<T: Transport + 'static, A: MessagesApi + 'static> ChatSession<T, A> {
    /// Replay every queued send, oldest first, one at a time.
    ///
    /// Waits `retry_settle` before replaying so a flapping connection can
    /// stabilise. Each replay goes through the full send pipeline; a network
    /// failure puts the entry back in the queue and the drain carries on.
    ///
    /// Returns `None` if another drain is already running.
    pub async fn drain_retry_queue(self: &Arc<Self>) -> Option<DrainReport> {
        let Some(_guard) = self.retry.try_begin_drain() else {
            tracing::debug!("retry drain already running");
            return None;
        };
        let mut report = DrainReport::default();
        if self.retry.is_empty() {
            return Some(report);
        }

        tokio::time::sleep(self.config.retry_settle).await;
        let entries = self.retry.take_all();
        tracing::info!(count = entries.len(), "draining retry queue");

        for entry in entries {
            let echoed = self.store.lock().has_recent_copy_of(
                &self.scope.current_user,
                &entry.content,
                entry.enqueued_at,
                self.config.echo_window,
            );
            if echoed {
                tracing::debug!("queued message already delivered, skipping replay");
                report.already_delivered += 1;
                continue;
            }
            match self.submit(&entry.content, Attempt::Replay).await {
                Ok(SendOutcome::Confirmed(_)) => report.delivered += 1,
                Ok(SendOutcome::Queued { .. }) => report.requeued += 1,
                Ok(SendOutcome::AlreadyPending(_)) => report.skipped += 1,
                Err(e) => {
                    tracing::warn!(error = %e, "queued message rejected on replay, dropping");
                    report.dropped += 1;
                }
            }
        }
        tracing::info!(
            delivered = report.delivered,
            requeued = report.requeued,
            dropped = report.dropped,
            skipped = report.skipped,
            already_delivered = report.already_delivered,
            "retry drain finished"
        );
        Some(report)
    }
}
