//! REST endpoints, bearer authentication, and server startup.

use std::sync::Arc;

use axum::extract::{FromRequestParts, Path, State};
use axum::http::StatusCode;
use axum::http::request::Parts;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};

use chatsync_proto::api::{ConversationHistory, ErrorBody, SendMessageRequest};
use chatsync_proto::events::ServerEvent;
use chatsync_proto::message::{Message, UserId};

use crate::socket;
use crate::state::{BackendState, StateError};

/// Failure returned by a handler, rendered as `{ "error": ... }`.
#[derive(Debug, thiserror::Error)]
pub enum ApiFailure {
    /// Missing or unknown bearer token.
    #[error("unauthorized")]
    Unauthorized,

    /// The request was understood but refused.
    #[error("{0}")]
    BadRequest(String),
}

impl From<StateError> for ApiFailure {
    fn from(err: StateError) -> Self {
        Self::BadRequest(err.to_string())
    }
}

impl IntoResponse for ApiFailure {
    fn into_response(self) -> Response {
        let status = match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
        };
        (
            status,
            Json(ErrorBody {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

/// The caller, resolved from the `Authorization: Bearer` header.
#[derive(Debug, Clone)]
pub struct AuthUser(pub UserId);

impl FromRequestParts<Arc<BackendState>> for AuthUser {
    type Rejection = ApiFailure;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<BackendState>,
    ) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|header| state.authenticate(header))
            .map(Self)
            .ok_or(ApiFailure::Unauthorized)
    }
}

/// `POST /messages/send`: persist, push to the receiver, return the record.
async fn send_message(
    AuthUser(me): AuthUser,
    State(state): State<Arc<BackendState>>,
    Json(body): Json<SendMessageRequest>,
) -> Result<Json<Message>, ApiFailure> {
    let message = state
        .store_message(&me, &body.receiver_id, &body.content)
        .await?;
    state
        .send_to_user(&body.receiver_id, &ServerEvent::ReceiveMessage(message.clone()))
        .await;
    Ok(Json(message))
}

/// `GET /messages/{other}`
async fn conversation(
    AuthUser(me): AuthUser,
    State(state): State<Arc<BackendState>>,
    Path(other): Path<String>,
) -> Json<ConversationHistory> {
    let other = UserId::new(other);
    Json(ConversationHistory {
        messages: state.conversation(&me, &other).await,
        other_user: Some(state.user_summary(&other)),
    })
}

/// `POST /messages/{other}/read`
async fn mark_read(
    AuthUser(me): AuthUser,
    State(state): State<Arc<BackendState>>,
    Path(other): Path<String>,
) -> StatusCode {
    let other = UserId::new(other);
    let ids = state.mark_read(&me, &other).await;
    if !ids.is_empty() {
        let receipt = ServerEvent::MessagesRead(chatsync_proto::events::ReadReceipt {
            messages: ids,
            read_by: me,
        });
        state.send_to_user(&other, &receipt).await;
    }
    StatusCode::NO_CONTENT
}

/// The full application router.
pub fn router(state: Arc<BackendState>) -> Router {
    Router::new()
        .route("/messages/send", post(send_message))
        .route("/messages/{other}", get(conversation))
        .route("/messages/{other}/read", post(mark_read))
        .route("/ws", get(socket::ws_handler))
        .with_state(state)
}

/// Bind `addr` and serve `state` in a background task.
///
/// Returns the bound address (useful with port `0`) and the server task.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server_with_state(
    addr: &str,
    state: Arc<BackendState>,
) -> std::io::Result<(std::net::SocketAddr, tokio::task::JoinHandle<()>)> {
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "backend server error");
        }
    });

    Ok((bound_addr, handle))
}
