// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::missing_panics_doc,
    clippy::future_not_send
)]

//! Retry queue replay: sends that failed for lack of connectivity are
//! replayed, oldest first, once the transport reconnects.
//!
//! Uses tokio's paused clock; the socket timeout, the failure grace period,
//! and the settle delay all elapse instantly.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;

use chatsync::api::ApiError;
use chatsync::api::scripted::ScriptedApi;
use chatsync::chat::scope::ConversationScope;
use chatsync::chat::{ChatEvent, ChatSession, DrainReport, SendOutcome, SyncConfig};
use chatsync::transport::loopback::LoopbackTransport;
use chatsync_proto::events::{ClientEvent, ServerEvent};
use chatsync_proto::message::{Message, MessageId, MessageStatus, UserId};

type Session = ChatSession<LoopbackTransport, ScriptedApi>;

fn setup(
    connected: bool,
) -> (
    Arc<Session>,
    mpsc::Receiver<ChatEvent>,
    Arc<LoopbackTransport>,
    Arc<ScriptedApi>,
) {
    let transport = Arc::new(LoopbackTransport::new(connected));
    let api = Arc::new(ScriptedApi::new(UserId::new("buyer")));
    let (session, events) = ChatSession::new(
        Arc::clone(&transport),
        Arc::clone(&api),
        ConversationScope::new(UserId::new("buyer"), UserId::new("seller")),
        None,
        SyncConfig::default(),
    );
    (session, events, transport, api)
}

/// Queue each text by sending it while both paths are down.
async fn queue_offline(session: &Arc<Session>, api: &ScriptedApi, texts: &[&str]) {
    api.set_offline(true);
    for text in texts {
        let outcome = session.send(text).await.unwrap();
        assert!(matches!(outcome, SendOutcome::Queued { .. }), "{outcome:?}");
    }
    api.set_offline(false);
}

fn confirm_over_socket(transport: &LoopbackTransport) {
    transport.respond_with(|event| match event {
        ClientEvent::SendMessage(payload) => vec![ServerEvent::MessageSent(Message {
            id: MessageId::new("sock-1"),
            sender_id: UserId::new("buyer"),
            receiver_id: payload.receiver_id.clone(),
            content: payload.content.clone(),
            status: MessageStatus::Sent,
            created_at: Utc::now(),
            sender: None,
        })],
        _ => vec![],
    });
}

fn own_echo(id: &str, content: &str) -> ServerEvent {
    ServerEvent::NewMessage(Message {
        id: MessageId::new(id),
        sender_id: UserId::new("buyer"),
        receiver_id: UserId::new("seller"),
        content: content.into(),
        status: MessageStatus::Sent,
        created_at: Utc::now(),
        sender: None,
    })
}

fn sent_contents(api: &ScriptedApi) -> Vec<String> {
    api.sent().into_iter().map(|(_, content)| content).collect()
}

async fn wait_for<F>(events: &mut mpsc::Receiver<ChatEvent>, mut pred: F) -> ChatEvent
where
    F: FnMut(&ChatEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(60), async {
        loop {
            let event = events.recv().await.expect("event channel closed");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

#[tokio::test(start_paused = true)]
async fn reconnect_replays_queued_send() {
    let (session, mut events, transport, api) = setup(false);
    session.open().await.unwrap();
    queue_offline(&session, &api, &["Hi"]).await;

    confirm_over_socket(&transport);
    transport.set_connected(true);

    wait_for(&mut events, |e| *e == ChatEvent::ConnectionChanged(true)).await;
    let confirmed = wait_for(&mut events, |e| matches!(e, ChatEvent::MessageConfirmed { .. })).await;
    let ChatEvent::MessageConfirmed { message, .. } = confirmed else {
        unreachable!()
    };
    assert_eq!(message.id, MessageId::new("sock-1"));
    assert!(session.retry_queue().is_empty());

    let snapshot = session.snapshot();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].content, "Hi");
    assert!(!snapshot[0].is_provisional());

    // The rejoin went out before the replayed send.
    let emitted = transport.emitted();
    let join = emitted
        .iter()
        .position(|e| matches!(e, ClientEvent::JoinConversation(_)))
        .unwrap();
    let replay = emitted
        .iter()
        .position(|e| matches!(e, ClientEvent::SendMessage(_)))
        .unwrap();
    assert!(join < replay);
}

#[tokio::test(start_paused = true)]
async fn drain_replays_in_enqueue_order() {
    let (session, _events, _transport, api) = setup(true);
    queue_offline(&session, &api, &["one", "two", "three"]).await;

    let report = session.drain_retry_queue().await.unwrap();
    assert_eq!(
        report,
        DrainReport {
            delivered: 3,
            ..DrainReport::default()
        }
    );
    assert_eq!(sent_contents(&api)[3..], ["one", "two", "three"]);
    assert!(session.retry_queue().is_empty());
}

#[tokio::test(start_paused = true)]
async fn network_failure_during_drain_requeues() {
    let (session, _events, _transport, api) = setup(true);
    queue_offline(&session, &api, &["Hi"]).await;

    api.set_offline(true);
    let report = session.drain_retry_queue().await.unwrap();
    assert_eq!(report.requeued, 1);
    assert_eq!(session.retry_queue().contents(), ["Hi"]);
}

#[tokio::test(start_paused = true)]
async fn rejected_replay_is_dropped() {
    let (session, _events, _transport, api) = setup(true);
    queue_offline(&session, &api, &["Hi", "there"]).await;

    api.fail_next_send(ApiError::Status {
        status: 422,
        message: "too long".into(),
    });
    let report = session.drain_retry_queue().await.unwrap();
    assert_eq!(report.dropped, 1);
    assert_eq!(report.delivered, 1);
    assert!(session.retry_queue().is_empty());
}

#[tokio::test(start_paused = true)]
async fn overlapping_drains_do_not_double_send() {
    let (session, _events, _transport, api) = setup(true);
    queue_offline(&session, &api, &["Hi"]).await;
    let before = api.sent().len();

    let (first, second) = tokio::join!(session.drain_retry_queue(), session.drain_retry_queue());
    let reports: Vec<_> = [first, second].into_iter().flatten().collect();
    assert_eq!(reports.len(), 1, "one drain must be refused");
    assert_eq!(reports[0].delivered, 1);
    assert_eq!(api.sent().len() - before, 1);
}

#[tokio::test(start_paused = true)]
async fn empty_queue_drains_immediately() {
    let (session, _events, _transport, api) = setup(true);
    let report = session.drain_retry_queue().await.unwrap();
    assert_eq!(report, DrainReport::default());
    assert!(api.sent().is_empty());
}

#[tokio::test(start_paused = true)]
async fn replay_waits_for_settle_delay() {
    let (session, mut events, transport, api) = setup(false);
    session.open().await.unwrap();
    queue_offline(&session, &api, &["Hi"]).await;
    let rest_before = api.sent().len();

    confirm_over_socket(&transport);
    let started = tokio::time::Instant::now();
    transport.set_connected(true);

    tokio::time::sleep(Duration::from_millis(999)).await;
    assert_eq!(api.sent().len(), rest_before);
    assert!(
        !transport
            .emitted()
            .iter()
            .any(|e| matches!(e, ClientEvent::SendMessage(_))),
        "replayed before the settle delay"
    );
    assert_eq!(session.retry_queue().contents(), ["Hi"]);

    wait_for(&mut events, |e| matches!(e, ChatEvent::MessageConfirmed { .. })).await;
    assert!(started.elapsed() >= session.config().retry_settle);
    assert!(session.retry_queue().is_empty());
}

#[tokio::test(start_paused = true)]
async fn echo_of_queued_send_is_not_replayed() {
    let (session, mut events, transport, api) = setup(false);
    session.open().await.unwrap();
    queue_offline(&session, &api, &["Hi"]).await;
    let rest_before = api.sent().len();

    // The server stored the send after all and echoes it back.
    transport.inject(&own_echo("srv-echo", "Hi"));
    wait_for(&mut events, |e| matches!(e, ChatEvent::MessageConfirmed { .. })).await;
    assert!(session.retry_queue().is_empty());

    transport.set_connected(true);
    tokio::time::sleep(Duration::from_secs(10)).await;

    assert_eq!(api.sent().len(), rest_before);
    assert!(
        !transport
            .emitted()
            .iter()
            .any(|e| matches!(e, ClientEvent::SendMessage(_)))
    );
    let snapshot = session.snapshot();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].id, MessageId::new("srv-echo"));
}

#[tokio::test(start_paused = true)]
async fn drain_skips_send_echoed_after_discard() {
    let (session, mut events, transport, api) = setup(false);
    session.open().await.unwrap();
    queue_offline(&session, &api, &["Hi", "there"]).await;

    // Grace period over: the provisional records are gone, the entries stay.
    tokio::time::sleep(Duration::from_millis(2100)).await;
    assert!(session.snapshot().is_empty());

    transport.inject(&own_echo("srv-echo", "Hi"));
    wait_for(&mut events, |e| matches!(e, ChatEvent::MessageReceived(_))).await;
    assert_eq!(session.retry_queue().contents(), ["Hi", "there"]);

    let rest_before = api.sent().len();
    let report = session.drain_retry_queue().await.unwrap();
    assert_eq!(
        report,
        DrainReport {
            delivered: 1,
            already_delivered: 1,
            ..DrainReport::default()
        }
    );
    assert_eq!(sent_contents(&api)[rest_before..], ["there"]);

    let contents: Vec<_> = session.snapshot().into_iter().map(|m| m.content).collect();
    assert_eq!(contents, ["Hi", "there"]);
}
