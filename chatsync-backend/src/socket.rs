//! WebSocket endpoint: authenticated connections exchanging JSON event frames.
//!
//! A client sends [`ClientEvent`]s. `send-message` is persisted and answered
//! with `message-sent` (or `message-error`) on the same socket, then pushed to
//! the receiver as `receive-message`. `mark-as-read` marks the other party's
//! messages read and notifies them with `messages-read`.

use std::sync::Arc;

use axum::extract::State;
use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use chatsync_proto::codec;
use chatsync_proto::events::{
    ClientEvent, ErrorPayload, ReadReceipt, SendMessagePayload, ServerEvent,
};
use chatsync_proto::message::UserId;

use crate::routes::AuthUser;
use crate::state::BackendState;

/// Upgrade an authenticated request to a WebSocket.
pub async fn ws_handler(
    AuthUser(user): AuthUser,
    ws: WebSocketUpgrade,
    State(state): State<Arc<BackendState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, user))
}

/// Serve one connection until either side closes it.
pub async fn handle_socket(socket: WebSocket, state: Arc<BackendState>, user: UserId) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<WsMessage>();
    let connection = state.register(&user, tx.clone()).await;
    tracing::info!(user = %user, connection, "socket connected");

    let writer_user = user.clone();
    let mut write_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, WsMessage::Close(_));
            if ws_sender.send(msg).await.is_err() {
                tracing::warn!(user = %writer_user, "socket write failed");
                break;
            }
            if closing {
                break;
            }
        }
    });

    let reader_user = user.clone();
    let reader_state = Arc::clone(&state);
    let mut read_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_receiver.next().await {
            match msg {
                WsMessage::Text(text) => {
                    handle_frame(&reader_user, text.as_str(), &reader_state, &tx).await;
                }
                WsMessage::Close(_) => {
                    tracing::debug!(user = %reader_user, "received close frame");
                    break;
                }
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut read_task => write_task.abort(),
        _ = &mut write_task => read_task.abort(),
    }

    state.unregister(&user, connection).await;
    tracing::info!(user = %user, connection, "socket disconnected");
}

async fn handle_frame(
    user: &UserId,
    frame: &str,
    state: &Arc<BackendState>,
    reply: &mpsc::UnboundedSender<WsMessage>,
) {
    let event = match codec::decode_client(frame) {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!(user = %user, error = %e, "dropping malformed frame");
            return;
        }
    };
    tracing::debug!(user = %user, event = event.name(), "client event");

    match event {
        ClientEvent::SendMessage(payload) => handle_send(user, payload, state, reply).await,
        ClientEvent::MarkAsRead(conversation) => {
            let ids = state.mark_read(user, &conversation.other_user_id).await;
            if ids.is_empty() {
                return;
            }
            let receipt = ServerEvent::MessagesRead(ReadReceipt {
                messages: ids,
                read_by: user.clone(),
            });
            state
                .send_to_user(&conversation.other_user_id, &receipt)
                .await;
        }
        // Rooms are implicit: delivery is addressed by user, so joining and
        // leaving only matter for logs.
        ClientEvent::JoinConversation(conversation) => {
            tracing::debug!(user = %user, other = %conversation.other_user_id, "joined conversation");
        }
        ClientEvent::LeaveConversation(conversation) => {
            tracing::debug!(user = %user, other = %conversation.other_user_id, "left conversation");
        }
    }
}

async fn handle_send(
    user: &UserId,
    payload: SendMessagePayload,
    state: &Arc<BackendState>,
    reply: &mpsc::UnboundedSender<WsMessage>,
) {
    let response = match state
        .store_message(user, &payload.receiver_id, &payload.content)
        .await
    {
        Ok(message) => {
            state
                .send_to_user(&payload.receiver_id, &ServerEvent::ReceiveMessage(message.clone()))
                .await;
            ServerEvent::MessageSent(message)
        }
        Err(e) => ServerEvent::MessageError(ErrorPayload {
            error: e.to_string(),
        }),
    };
    match codec::encode_server(&response) {
        Ok(frame) => {
            let _ = reply.send(WsMessage::Text(frame.into()));
        }
        Err(e) => tracing::error!(error = %e, "failed to encode reply"),
    }
}
