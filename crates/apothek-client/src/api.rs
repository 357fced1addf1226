//! Collaborator API client.
//!
//! The API server is the authoritative writer: every mutation returns the
//! canonical persisted record, so the engine never fabricates ids or
//! timestamps. Nothing here retries — failures surface per-action and
//! recovery is the user re-attempting.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use apothek_shared::{
    Attachment, CallId, CallKind, Conversation, ConversationId, Message, MessageId, UserId,
};

/// Errors produced by the API layer.
#[derive(Error, Debug)]
pub enum ApiError {
    /// Transport-level failure (connect, TLS, body, JSON decode).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with a non-success status.
    #[error("API rejected the request ({status}): {message}")]
    Status { status: u16, message: String },
}

/// The canonical call record returned by the call-lifecycle endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CallRecord {
    pub id: CallId,
    pub kind: CallKind,
    pub caller_id: UserId,
    pub receiver_id: UserId,
    pub created_at: DateTime<Utc>,
}

/// The API surface the engine consumes.
///
/// Kept as a trait so the engine can be driven against an in-memory fake;
/// [`ApiClient`] is the production implementation.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Persist a message. Returns the server-confirmed record.
    async fn send_message(
        &self,
        receiver: UserId,
        content: &str,
        attachments: &[Attachment],
    ) -> Result<Message, ApiError>;

    /// Mark every unread message from `sender` as read.
    async fn mark_read(&self, sender: UserId) -> Result<(), ApiError>;

    /// Persist a new call record.
    async fn initiate_call(&self, receiver: UserId, kind: CallKind)
        -> Result<CallRecord, ApiError>;

    async fn answer_call(&self, call: CallId) -> Result<(), ApiError>;

    async fn reject_call(&self, call: CallId) -> Result<(), ApiError>;

    async fn end_call(&self, call: CallId) -> Result<(), ApiError>;

    /// The conversation list, newest activity first.
    async fn conversations(&self) -> Result<Vec<Conversation>, ApiError>;

    /// One page of messages strictly older than `before`, oldest first.
    /// `before = None` fetches the newest page.
    async fn messages_before(
        &self,
        conversation: ConversationId,
        before: Option<MessageId>,
        limit: u32,
    ) -> Result<Vec<Message>, ApiError>;

    /// Total unread count across conversations, as the server sees it
    /// (read receipts from other devices included).
    async fn unread_count(&self) -> Result<u32, ApiError>;
}

// ---------------------------------------------------------------------------
// HTTP implementation
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    receiver_id: UserId,
    content: &'a str,
    attachments: &'a [Attachment],
}

#[derive(Debug, Serialize)]
struct MarkReadRequest {
    sender_id: UserId,
}

#[derive(Debug, Serialize)]
struct InitiateCallRequest {
    receiver_id: UserId,
    call_type: CallKind,
}

#[derive(Debug, Deserialize)]
struct UnreadCountResponse {
    count: u32,
}

/// `reqwest`-backed [`Backend`].
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Map a non-success response to `ApiError::Status` with the body text.
    async fn check(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(ApiError::Status {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl Backend for ApiClient {
    async fn send_message(
        &self,
        receiver: UserId,
        content: &str,
        attachments: &[Attachment],
    ) -> Result<Message, ApiError> {
        debug!(receiver = %receiver, "POST message");
        let response = self
            .http
            .post(self.url("/messages"))
            .json(&SendMessageRequest {
                receiver_id: receiver,
                content,
                attachments,
            })
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn mark_read(&self, sender: UserId) -> Result<(), ApiError> {
        let response = self
            .http
            .post(self.url("/messages/mark-read"))
            .json(&MarkReadRequest { sender_id: sender })
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn initiate_call(
        &self,
        receiver: UserId,
        kind: CallKind,
    ) -> Result<CallRecord, ApiError> {
        debug!(receiver = %receiver, kind = %kind, "POST call");
        let response = self
            .http
            .post(self.url("/calls"))
            .json(&InitiateCallRequest {
                receiver_id: receiver,
                call_type: kind,
            })
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn answer_call(&self, call: CallId) -> Result<(), ApiError> {
        let response = self
            .http
            .post(self.url(&format!("/calls/{call}/answer")))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn reject_call(&self, call: CallId) -> Result<(), ApiError> {
        let response = self
            .http
            .post(self.url(&format!("/calls/{call}/reject")))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn end_call(&self, call: CallId) -> Result<(), ApiError> {
        let response = self
            .http
            .post(self.url(&format!("/calls/{call}/end")))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn conversations(&self) -> Result<Vec<Conversation>, ApiError> {
        let response = self.http.get(self.url("/conversations")).send().await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn messages_before(
        &self,
        conversation: ConversationId,
        before: Option<MessageId>,
        limit: u32,
    ) -> Result<Vec<Message>, ApiError> {
        let mut request = self
            .http
            .get(self.url(&format!("/conversations/{conversation}/messages")))
            .query(&[("limit", limit)]);
        if let Some(before) = before {
            request = request.query(&[("before", before.0)]);
        }
        let response = request.send().await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn unread_count(&self) -> Result<u32, ApiError> {
        let response = self
            .http
            .get(self.url("/messages/unread-count"))
            .send()
            .await?;
        let body: UnreadCountResponse = Self::check(response).await?.json().await?;
        Ok(body.count)
    }
}
