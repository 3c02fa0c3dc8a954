//! Persistence boundary port.
//!
//! The dispatcher only ever talks to [`SessionStore`]; the SQLite adapter
//! lives in `voxgate-db`. Semantics are at-least-once: `append_message` is
//! idempotent on `(session_id, client_message_id)` when the caller supplies
//! a client id, and duplicate upserts of a session are harmless.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Persistence failure. Non-terminal for workflows: logged, surfaced as an
/// `error(stage = "persistence")` event, and generation continues.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("session not found: {0}")]
    SessionNotFound(String),
    #[error("database error: {0}")]
    Database(String),
}

/// Author of a stored message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

impl MessageRole {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            _ => None,
        }
    }
}

/// A persisted message, as read back from the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: String,
    pub session_id: String,
    pub role: MessageRole,
    pub content: String,
    pub attachments: Vec<String>,
    /// RFC 3339 creation time.
    pub created_at: String,
}

/// A message to persist.
#[derive(Debug, Clone)]
pub struct NewStoredMessage {
    pub role: MessageRole,
    pub content: String,
    pub attachments: Vec<String>,
    /// Best-effort metadata (e.g. the `notification` session tag).
    pub metadata: Option<Value>,
    /// Client-supplied idempotency key.
    pub client_message_id: Option<String>,
}

impl NewStoredMessage {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            attachments: Vec::new(),
            metadata: None,
            client_message_id: None,
        }
    }

    #[must_use]
    pub fn with_attachments(mut self, attachments: Vec<String>) -> Self {
        self.attachments = attachments;
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Session/message persistence operations consumed by the dispatcher.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Return an existing session id or create a session for the customer.
    async fn ensure_session(
        &self,
        customer_id: &str,
        session_id: Option<&str>,
    ) -> Result<String, StoreError>;

    /// Insert a message; returns its id. Idempotent on
    /// `(session_id, client_message_id)` when a client id is supplied.
    async fn append_message(
        &self,
        session_id: &str,
        message: NewStoredMessage,
    ) -> Result<String, StoreError>;

    /// Ordered message history for a session.
    async fn session_messages(&self, session_id: &str) -> Result<Vec<StoredMessage>, StoreError>;
}
