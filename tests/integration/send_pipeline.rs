// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::missing_panics_doc,
    clippy::future_not_send
)]

//! Optimistic send pipeline, driven through the public session API.
//!
//! Every test runs on a loopback transport with a scripted REST API so the
//! socket path, the REST fallback, and the failure branches can be forced
//! deterministically. Timing-sensitive tests use tokio's paused clock.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;

use chatsync::api::ApiError;
use chatsync::api::scripted::ScriptedApi;
use chatsync::chat::scope::ConversationScope;
use chatsync::chat::{ChatEvent, ChatSession, Notice, SendError, SendOutcome, SyncConfig};
use chatsync::transport::loopback::LoopbackTransport;
use chatsync_proto::events::{ClientEvent, ServerEvent};
use chatsync_proto::message::{Message, MessageId, MessageStatus, UserId};

type Session = ChatSession<LoopbackTransport, ScriptedApi>;

struct Harness {
    session: Arc<Session>,
    events: mpsc::Receiver<ChatEvent>,
    transport: Arc<LoopbackTransport>,
    api: Arc<ScriptedApi>,
}

fn harness(connected: bool) -> Harness {
    let transport = Arc::new(LoopbackTransport::new(connected));
    let api = Arc::new(ScriptedApi::new(UserId::new("buyer")));
    let (session, events) = ChatSession::new(
        Arc::clone(&transport),
        Arc::clone(&api),
        ConversationScope::new(UserId::new("buyer"), UserId::new("seller")),
        None,
        SyncConfig::default(),
    );
    Harness {
        session,
        events,
        transport,
        api,
    }
}

fn durable(id: &str, content: &str) -> Message {
    Message {
        id: MessageId::new(id),
        sender_id: UserId::new("buyer"),
        receiver_id: UserId::new("seller"),
        content: content.to_string(),
        status: MessageStatus::Sent,
        created_at: Utc::now(),
        sender: None,
    }
}

/// Answer every `send-message` with `message-sent`, ids `sock-1`, `sock-2`, ...
fn socket_confirms(transport: &LoopbackTransport) {
    let counter = AtomicU64::new(1);
    transport.respond_with(move |event| match event {
        ClientEvent::SendMessage(payload) => {
            let n = counter.fetch_add(1, Ordering::Relaxed);
            vec![ServerEvent::MessageSent(durable(
                &format!("sock-{n}"),
                &payload.content,
            ))]
        }
        _ => vec![],
    });
}

/// Collect every event currently buffered.
fn drain_events(events: &mut mpsc::Receiver<ChatEvent>) -> Vec<ChatEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

#[tokio::test]
async fn socket_confirmation_replaces_provisional_in_place() {
    let mut h = harness(true);
    socket_confirms(&h.transport);

    let outcome = h.session.send("  Is this still available?  ").await.unwrap();
    let SendOutcome::Confirmed(message) = outcome else {
        panic!("expected confirmation, got {outcome:?}");
    };
    assert_eq!(message.id, MessageId::new("sock-1"));
    assert_eq!(message.content, "Is this still available?");

    let events = drain_events(&mut h.events);
    let ChatEvent::MessagePending(pending) = &events[0] else {
        panic!("first event should be the provisional record: {events:?}");
    };
    assert!(pending.is_provisional());
    assert_eq!(
        events[1],
        ChatEvent::MessageConfirmed {
            provisional_id: pending.id.clone(),
            message: message.clone(),
        }
    );

    assert_eq!(h.session.snapshot(), vec![message]);
    assert!(h.api.sent().is_empty(), "REST must not be used");
}

#[tokio::test(start_paused = true)]
async fn silent_socket_falls_back_to_rest() {
    let h = harness(true);

    let outcome = h.session.send("Hi").await.unwrap();
    assert!(matches!(outcome, SendOutcome::Confirmed(ref m) if m.id == MessageId::new("srv-1")));
    assert_eq!(h.api.sent(), [(UserId::new("seller"), "Hi".to_string())]);

    let snapshot = h.session.snapshot();
    assert_eq!(snapshot.len(), 1);
    assert!(!snapshot[0].is_provisional());
}

#[tokio::test(start_paused = true)]
async fn offline_send_is_queued_then_hidden_after_grace() {
    let mut h = harness(false);
    h.api.set_offline(true);

    let outcome = h.session.send("Hi").await.unwrap();
    let SendOutcome::Queued { provisional_id } = outcome else {
        panic!("expected queued, got {outcome:?}");
    };
    assert_eq!(h.session.retry_queue().contents(), ["Hi"]);
    assert_eq!(h.session.snapshot().len(), 1, "visible during the grace period");

    tokio::time::sleep(Duration::from_millis(2100)).await;
    assert!(h.session.snapshot().is_empty());

    let events = drain_events(&mut h.events);
    assert!(events.contains(&ChatEvent::Notice(Notice::QueuedForRetry {
        content: "Hi".into()
    })));
    assert_eq!(
        events.last(),
        Some(&ChatEvent::MessageRemoved(provisional_id))
    );
}

#[tokio::test(start_paused = true)]
async fn rejection_restores_draft_and_removes_record() {
    let mut h = harness(true);
    h.api.fail_next_send(ApiError::Status {
        status: 403,
        message: "blocked".into(),
    });

    let err = h.session.send("Hi there ").await.unwrap_err();
    let SendError::Rejected { draft, reason } = err else {
        panic!("expected rejection");
    };
    assert_eq!(draft, "Hi there ");
    assert!(!reason.is_network());
    assert!(h.session.snapshot().is_empty());
    assert!(h.session.retry_queue().is_empty());

    let events = drain_events(&mut h.events);
    assert!(matches!(events[1], ChatEvent::MessageRemoved(_)));
    assert!(matches!(
        &events[2],
        ChatEvent::Notice(Notice::SendRejected { content, .. }) if content == "Hi there"
    ));
}

#[tokio::test(start_paused = true)]
async fn double_submit_transmits_once() {
    let h = harness(true);
    h.api.set_latency(Duration::from_millis(500));

    let (first, second) = tokio::join!(h.session.send("Hi"), h.session.send("Hi"));
    let outcomes = [first.unwrap(), second.unwrap()];
    assert_eq!(
        outcomes
            .iter()
            .filter(|o| matches!(o, SendOutcome::AlreadyPending(_)))
            .count(),
        1
    );
    assert_eq!(h.api.sent().len(), 1);
    assert_eq!(h.session.snapshot().len(), 1);
}

#[tokio::test]
async fn own_echo_after_confirmation_is_not_duplicated() {
    let h = harness(true);
    socket_confirms(&h.transport);
    h.session.open().await.unwrap();

    let SendOutcome::Confirmed(message) = h.session.send("Hi").await.unwrap() else {
        panic!("expected confirmation");
    };
    // The backend also pushes our own message back as receive-message.
    h.transport.inject(&ServerEvent::ReceiveMessage(message.clone()));
    // And a second delivery under a different id inside the echo window.
    h.transport
        .inject(&ServerEvent::ReceiveMessage(durable("srv-echo", "Hi")));

    assert_eq!(h.session.snapshot(), vec![message]);
}

#[tokio::test]
async fn incoming_message_for_other_conversation_is_ignored() {
    let h = harness(true);
    h.session.open().await.unwrap();

    let mut stray = durable("x-1", "wrong thread");
    stray.sender_id = UserId::new("someone-else");
    stray.receiver_id = UserId::new("buyer");
    h.transport.inject(&ServerEvent::ReceiveMessage(stray));

    let mut incoming = durable("x-2", "Yes, still available");
    incoming.sender_id = UserId::new("seller");
    incoming.receiver_id = UserId::new("buyer");
    h.transport.inject(&ServerEvent::ReceiveMessage(incoming.clone()));

    assert_eq!(h.session.snapshot(), vec![incoming]);
}
