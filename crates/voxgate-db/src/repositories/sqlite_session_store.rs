//! `SQLite` implementation of the `SessionStore` trait.

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use voxgate_core::store::{
    MessageRole, NewStoredMessage, SessionStore, StoreError, StoredMessage,
};

/// `SQLite` implementation of the `SessionStore` trait.
///
/// Holds a connection pool and implements session upsert plus insert-only
/// message persistence with at-least-once semantics.
pub struct SqliteSessionStore {
    pool: SqlitePool,
}

impl SqliteSessionStore {
    /// Create a new `SQLite` session store.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn ensure_session(
        &self,
        customer_id: &str,
        session_id: Option<&str>,
    ) -> Result<String, StoreError> {
        let id = match session_id {
            Some(existing) if !existing.trim().is_empty() => existing.to_string(),
            _ => Uuid::new_v4().to_string(),
        };

        // Upsert-by-ID: re-binding an existing session is a no-op.
        sqlx::query(
            "INSERT INTO chat_sessions (id, customer_id) VALUES (?, ?)
             ON CONFLICT(id) DO NOTHING",
        )
        .bind(&id)
        .bind(customer_id)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(id)
    }

    async fn append_message(
        &self,
        session_id: &str,
        message: NewStoredMessage,
    ) -> Result<String, StoreError> {
        // Idempotency: a client-supplied id that already exists returns the
        // stored row instead of inserting a duplicate.
        if let Some(client_id) = &message.client_message_id {
            let existing = sqlx::query(
                "SELECT id FROM chat_messages
                 WHERE session_id = ? AND client_message_id = ?",
            )
            .bind(session_id)
            .bind(client_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

            if let Some(row) = existing {
                debug!(session_id, client_id, "duplicate append ignored");
                return Ok(row.get("id"));
            }
        }

        let attachments = serde_json::to_string(&message.attachments)
            .map_err(|e| StoreError::Database(e.to_string()))?;
        let metadata = message
            .metadata
            .as_ref()
            .map(serde_json::Value::to_string);

        let id = Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO chat_messages
                 (id, session_id, role, content, attachments, metadata, client_message_id)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(session_id)
        .bind(message.role.as_str())
        .bind(&message.content)
        .bind(&attachments)
        .bind(&metadata)
        .bind(&message.client_message_id)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        sqlx::query(
            "UPDATE chat_sessions
             SET updated_at = strftime('%Y-%m-%dT%H:%M:%fZ','now')
             WHERE id = ?",
        )
        .bind(session_id)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(id)
    }

    async fn session_messages(&self, session_id: &str) -> Result<Vec<StoredMessage>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, session_id, role, content, attachments, created_at
             FROM chat_messages
             WHERE session_id = ?
             ORDER BY created_at ASC, id ASC",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        let messages = rows
            .iter()
            .map(|row| {
                let role_str: String = row.get("role");
                let role = MessageRole::parse(&role_str).unwrap_or(MessageRole::User);
                let attachments_json: String = row.get("attachments");
                let attachments =
                    serde_json::from_str(&attachments_json).unwrap_or_default();
                StoredMessage {
                    id: row.get("id"),
                    session_id: row.get("session_id"),
                    role,
                    content: row.get("content"),
                    attachments,
                    created_at: row.get("created_at"),
                }
            })
            .collect();

        Ok(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::setup::setup_test_database;

    async fn store() -> SqliteSessionStore {
        SqliteSessionStore::new(setup_test_database().await.unwrap())
    }

    #[tokio::test]
    async fn ensure_session_creates_and_reuses() {
        let store = store().await;
        let id = store.ensure_session("cust-1", None).await.unwrap();
        assert!(!id.is_empty());

        let again = store.ensure_session("cust-1", Some(&id)).await.unwrap();
        assert_eq!(again, id);

        // Empty session id counts as absent.
        let fresh = store.ensure_session("cust-1", Some("")).await.unwrap();
        assert_ne!(fresh, id);
    }

    #[tokio::test]
    async fn messages_round_trip_in_order() {
        let store = store().await;
        let session = store.ensure_session("cust-1", None).await.unwrap();

        store
            .append_message(
                &session,
                NewStoredMessage::new(MessageRole::User, "hello")
                    .with_attachments(vec!["blob://img".into()]),
            )
            .await
            .unwrap();
        store
            .append_message(
                &session,
                NewStoredMessage::new(MessageRole::Assistant, "hi there"),
            )
            .await
            .unwrap();

        let messages = store.session_messages(&session).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, MessageRole::User);
        assert_eq!(messages[0].attachments, vec!["blob://img".to_string()]);
        assert_eq!(messages[1].content, "hi there");
    }

    #[tokio::test]
    async fn client_message_id_is_idempotent() {
        let store = store().await;
        let session = store.ensure_session("cust-1", None).await.unwrap();

        let mut message = NewStoredMessage::new(MessageRole::User, "only once");
        message.client_message_id = Some("client-42".into());

        let first = store
            .append_message(&session, message.clone())
            .await
            .unwrap();
        let second = store.append_message(&session, message).await.unwrap();
        assert_eq!(first, second);

        let messages = store.session_messages(&session).await.unwrap();
        assert_eq!(messages.len(), 1);
    }

    #[tokio::test]
    async fn metadata_is_stored_as_json() {
        let store = store().await;
        let session = store.ensure_session("cust-1", None).await.unwrap();
        store
            .append_message(
                &session,
                NewStoredMessage::new(MessageRole::User, "tagged")
                    .with_metadata(serde_json::json!({"notification": true})),
            )
            .await
            .unwrap();
        // Metadata is best-effort; reading it back is not part of the
        // store contract, but the row must exist.
        assert_eq!(store.session_messages(&session).await.unwrap().len(), 1);
    }
}
