// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::missing_panics_doc,
    clippy::future_not_send
)]

//! End-to-end against the in-process backend: real WebSocket, real REST.
//!
//! Two logged-in clients talk through a `chatsync-backend` bound to an
//! OS-assigned port.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use chatsync::chat::{ChatEvent, SendOutcome};
use chatsync::client::{ClientSession, LoginOptions};
use chatsync::credential::Credential;
use chatsync::transport::{ReconnectPolicy, Transport};
use chatsync_backend::routes::start_server_with_state;
use chatsync_backend::state::BackendState;
use chatsync_proto::message::{MessageStatus, UserId};

async fn start_backend() -> (std::net::SocketAddr, Arc<BackendState>) {
    let state = Arc::new(
        BackendState::new()
            .with_user("buyer-token", "buyer")
            .with_user("seller-token", "seller"),
    );
    let (addr, _handle) = start_server_with_state("127.0.0.1:0", Arc::clone(&state))
        .await
        .unwrap();
    (addr, state)
}

async fn login(addr: std::net::SocketAddr, token: &str, user: &str) -> ClientSession {
    let session = ClientSession::login(
        &format!("http://{addr}"),
        &format!("ws://{addr}/ws"),
        &Credential::new(token),
        UserId::new(user),
        LoginOptions::default(),
    )
    .unwrap();
    let mut connectivity = session.transport().connectivity();
    tokio::time::timeout(Duration::from_secs(5), connectivity.wait_for(|up| *up))
        .await
        .expect("socket never connected")
        .unwrap();
    session
}

async fn wait_for<F>(events: &mut mpsc::Receiver<ChatEvent>, mut pred: F) -> ChatEvent
where
    F: FnMut(&ChatEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
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

#[tokio::test]
async fn message_is_confirmed_delivered_and_read() {
    let (addr, _state) = start_backend().await;
    let buyer = login(addr, "buyer-token", "buyer").await;
    let seller = login(addr, "seller-token", "seller").await;

    let (to_seller, mut buyer_events) = buyer.open_conversation(UserId::new("seller")).await;
    let (to_buyer, mut seller_events) = seller.open_conversation(UserId::new("buyer")).await;

    let outcome = to_seller.send("Is this still available?").await.unwrap();
    let SendOutcome::Confirmed(sent) = outcome else {
        panic!("expected confirmation, got {outcome:?}");
    };
    assert!(!sent.is_provisional());

    let received = wait_for(&mut seller_events, |e| matches!(e, ChatEvent::MessageReceived(_))).await;
    assert_eq!(received, ChatEvent::MessageReceived(sent.clone()));
    assert_eq!(to_buyer.snapshot(), vec![sent.clone()]);

    // The seller's session marks incoming messages read; the buyer sees it.
    let status = wait_for(&mut buyer_events, |e| matches!(e, ChatEvent::StatusChanged { .. })).await;
    assert_eq!(
        status,
        ChatEvent::StatusChanged {
            message_ids: vec![sent.id.clone()],
            status: MessageStatus::Read,
        }
    );

    let snapshot = to_seller.snapshot();
    assert_eq!(snapshot.len(), 1, "no duplicate from the receive echo");
    assert_eq!(snapshot[0].status, MessageStatus::Read);

    to_seller.close();
    to_buyer.close();
    buyer.logout();
    seller.logout();
}

#[tokio::test]
async fn opening_a_conversation_loads_history() {
    let (addr, state) = start_backend().await;
    let buyer_id = UserId::new("buyer");
    let seller_id = UserId::new("seller");
    state.store_message(&buyer_id, &seller_id, "Hello").await.unwrap();
    state.store_message(&seller_id, &buyer_id, "Hi!").await.unwrap();

    let buyer = login(addr, "buyer-token", "buyer").await;
    let (conversation, mut events) = buyer.open_conversation(seller_id.clone()).await;

    let loaded = wait_for(&mut events, |e| matches!(e, ChatEvent::HistoryLoaded { .. })).await;
    let ChatEvent::HistoryLoaded { count, other_user } = loaded else {
        unreachable!()
    };
    assert_eq!(count, 2);
    assert_eq!(other_user.unwrap().id, seller_id);

    let contents: Vec<_> = conversation
        .snapshot()
        .into_iter()
        .map(|m| m.content)
        .collect();
    assert_eq!(contents, ["Hello", "Hi!"]);

    // Opening marked the seller's message read on the backend.
    let history = state.conversation(&seller_id, &buyer_id).await;
    assert_eq!(history[1].status, MessageStatus::Read);
}

#[tokio::test]
async fn blank_content_is_refused_before_the_network() {
    let (addr, state) = start_backend().await;
    let buyer = login(addr, "buyer-token", "buyer").await;
    let (conversation, _events) = buyer.open_conversation(UserId::new("seller")).await;

    assert!(conversation.send("   ").await.is_err());
    assert!(
        state
            .conversation(&UserId::new("buyer"), &UserId::new("seller"))
            .await
            .is_empty()
    );
}

#[tokio::test]
async fn refreshed_credential_reconnects_and_authorizes_rest() {
    let (addr, state) = start_backend().await;
    let seller_id = UserId::new("seller");
    state
        .store_message(&UserId::new("buyer"), &seller_id, "Hello")
        .await
        .unwrap();

    // The backend refuses the stale token, so the socket gives up quickly.
    let buyer = ClientSession::login(
        &format!("http://{addr}"),
        &format!("ws://{addr}/ws"),
        &Credential::new("expired-token"),
        UserId::new("buyer"),
        LoginOptions {
            reconnect: ReconnectPolicy {
                max_attempts: 1,
                delay: Duration::from_millis(20),
            },
            ..LoginOptions::default()
        },
    )
    .unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!buyer.transport().is_connected());

    buyer.refresh_credential(&Credential::new("buyer-token")).unwrap();
    let mut connectivity = buyer.transport().connectivity();
    tokio::time::timeout(Duration::from_secs(5), connectivity.wait_for(|up| *up))
        .await
        .expect("socket never reconnected")
        .unwrap();

    let (conversation, mut events) = buyer.open_conversation(seller_id).await;
    let loaded = wait_for(&mut events, |e| matches!(e, ChatEvent::HistoryLoaded { .. })).await;
    assert!(matches!(loaded, ChatEvent::HistoryLoaded { count: 1, .. }));
    assert_eq!(conversation.snapshot()[0].content, "Hello");
    buyer.logout();
}
