//! REST client for the messaging endpoints.
//!
//! [`MessagesApi`] is the seam the send pipeline and the conversation session
//! talk to. [`HttpApi`] implements it over `reqwest`; [`scripted::ScriptedApi`]
//! is an in-memory stand-in for tests and offline demos.

pub mod scripted;

use std::future::Future;
use std::time::Duration;

use parking_lot::RwLock;
use url::Url;

use chatsync_proto::api::{ConversationHistory, ErrorBody, SendMessageRequest};
use chatsync_proto::message::{Message, UserId};

use crate::credential::Credential;

/// Errors returned by the REST client.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    /// The request never produced a response (refused, reset, timed out, offline).
    #[error("network error: {0}")]
    Network(String),

    /// The server answered with a non-success status.
    #[error("server returned {status}: {message}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Error text from the body, or the status reason.
        message: String,
    },

    /// The response body could not be decoded.
    #[error("malformed response: {0}")]
    Decode(String),

    /// The configured base URL cannot carry request paths.
    #[error("invalid api url: {0}")]
    InvalidUrl(String),
}

impl ApiError {
    /// Returns `true` if the failure is connectivity-related and worth retrying
    /// once the connection comes back. Any HTTP response counts as reachable.
    #[must_use]
    pub const fn is_network(&self) -> bool {
        matches!(self, Self::Network(_))
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Decode(err.to_string())
        } else if err.is_builder() {
            Self::InvalidUrl(err.to_string())
        } else if let Some(status) = err.status() {
            Self::Status {
                status: status.as_u16(),
                message: err.to_string(),
            }
        } else {
            Self::Network(err.to_string())
        }
    }
}

/// The REST operations the messaging core depends on.
pub trait MessagesApi: Send + Sync {
    /// `POST /messages/send`; returns the durable record.
    fn send_message(
        &self,
        receiver: &UserId,
        content: &str,
    ) -> impl Future<Output = Result<Message, ApiError>> + Send;

    /// `GET /messages/:otherUserId`.
    fn conversation(
        &self,
        other: &UserId,
    ) -> impl Future<Output = Result<ConversationHistory, ApiError>> + Send;

    /// `POST /messages/:otherUserId/read`.
    fn mark_read(&self, other: &UserId) -> impl Future<Output = Result<(), ApiError>> + Send;
}

/// `reqwest`-backed [`MessagesApi`] with bearer authentication.
#[derive(Debug)]
pub struct HttpApi {
    client: reqwest::Client,
    base: Url,
    credential: RwLock<Credential>,
}

impl HttpApi {
    /// Build a client for `base_url` (e.g. `https://api.example.com/api`).
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::InvalidUrl`] if the URL does not parse or cannot be
    /// a base, and [`ApiError::Network`] if the HTTP client cannot be built.
    pub fn new(
        base_url: &str,
        credential: Credential,
        request_timeout: Duration,
    ) -> Result<Self, ApiError> {
        let base =
            Url::parse(base_url).map_err(|e| ApiError::InvalidUrl(format!("{base_url}: {e}")))?;
        if base.cannot_be_a_base() {
            return Err(ApiError::InvalidUrl(base_url.to_string()));
        }
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .user_agent(concat!("chatsync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ApiError::Network(e.to_string()))?;
        Ok(Self {
            client,
            base,
            credential: RwLock::new(credential),
        })
    }

    /// Replace the bearer credential (after a refresh).
    pub fn set_credential(&self, credential: Credential) {
        *self.credential.write() = credential;
    }

    fn bearer(&self) -> String {
        self.credential.read().bearer()
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, ApiError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| ApiError::InvalidUrl(self.base.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

/// Turn a non-success response into [`ApiError::Status`], preferring the
/// backend's `{ "error": ... }` body for the message.
async fn check(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&text).map_or_else(
        |_| {
            status
                .canonical_reason()
                .unwrap_or("request failed")
                .to_string()
        },
        |body| body.error,
    );
    Err(ApiError::Status {
        status: status.as_u16(),
        message,
    })
}

impl MessagesApi for HttpApi {
    async fn send_message(&self, receiver: &UserId, content: &str) -> Result<Message, ApiError> {
        let url = self.endpoint(&["messages", "send"])?;
        let body = SendMessageRequest {
            receiver_id: receiver.clone(),
            content: content.to_string(),
        };
        tracing::debug!(receiver = %receiver, "POST /messages/send");
        let response = self
            .client
            .post(url)
            .header(reqwest::header::AUTHORIZATION, self.bearer())
            .json(&body)
            .send()
            .await?;
        Ok(check(response).await?.json::<Message>().await?)
    }

    async fn conversation(&self, other: &UserId) -> Result<ConversationHistory, ApiError> {
        let url = self.endpoint(&["messages", other.as_str()])?;
        tracing::debug!(other = %other, "GET /messages/:other");
        let response = self
            .client
            .get(url)
            .header(reqwest::header::AUTHORIZATION, self.bearer())
            .send()
            .await?;
        Ok(check(response).await?.json::<ConversationHistory>().await?)
    }

    async fn mark_read(&self, other: &UserId) -> Result<(), ApiError> {
        let url = self.endpoint(&["messages", other.as_str(), "read"])?;
        tracing::debug!(other = %other, "POST /messages/:other/read");
        let response = self
            .client
            .post(url)
            .header(reqwest::header::AUTHORIZATION, self.bearer())
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }
}
