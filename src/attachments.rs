//! Attachment storage consumed by the script attachment API.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

use crate::context::ExecutionContext;
use crate::db::{Database, DbError, RowMap, SqlParam};

/// Attachment errors.
#[derive(Debug, Error)]
pub enum AttachmentError {
    /// Storage failure.
    #[error("attachment storage error: {0}")]
    Database(#[from] DbError),

    /// Stored metadata could not be decoded.
    #[error("corrupt attachment record: {0}")]
    Corrupt(String),
}

/// Metadata for a stored attachment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttachmentMetadata {
    /// Attachment id.
    pub id: Uuid,
    /// Original or script-assigned file name.
    pub filename: String,
    /// Free-form description.
    pub description: String,
    /// MIME type.
    pub mime_type: String,
    /// Content length in bytes.
    pub size: u64,
    /// Conversation that created it.
    pub conversation_id: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// A new attachment.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAttachment {
    /// Raw content.
    pub content: Vec<u8>,
    /// File name.
    pub filename: String,
    /// Description.
    pub description: String,
    /// MIME type.
    pub mime_type: String,
}

/// Attachment store.
#[async_trait]
pub trait AttachmentRegistry: Send + Sync {
    /// Metadata for `id`, if it exists.
    async fn get_attachment(
        &self,
        context: &ExecutionContext,
        id: Uuid,
    ) -> Result<Option<AttachmentMetadata>, AttachmentError>;

    /// Content for `id`, if it exists.
    async fn get_attachment_content(
        &self,
        context: &ExecutionContext,
        id: Uuid,
    ) -> Result<Option<Vec<u8>>, AttachmentError>;

    /// Store `attachment` and register it under a fresh id.
    async fn store_and_register(
        &self,
        context: &ExecutionContext,
        attachment: NewAttachment,
    ) -> Result<AttachmentMetadata, AttachmentError>;
}

/// Attachments stored in the `attachments` table.
#[derive(Debug, Clone)]
pub struct SqliteAttachmentRegistry {
    database: Database,
}

impl SqliteAttachmentRegistry {
    /// Registry over `database`.
    pub fn new(database: Database) -> Self {
        Self { database }
    }
}

fn metadata_from_row(row: &RowMap) -> Result<AttachmentMetadata, AttachmentError> {
    let text = |key: &str| {
        row.get(key)
            .and_then(JsonValue::as_str)
            .map(str::to_string)
            .ok_or_else(|| AttachmentError::Corrupt(format!("missing column '{key}'")))
    };
    let id = Uuid::parse_str(&text("id")?).map_err(|e| AttachmentError::Corrupt(e.to_string()))?;
    let created_at = DateTime::parse_from_rfc3339(&text("created_at")?)
        .map_err(|e| AttachmentError::Corrupt(e.to_string()))?
        .with_timezone(&Utc);
    Ok(AttachmentMetadata {
        id,
        filename: text("filename")?,
        description: text("description")?,
        mime_type: text("mime_type")?,
        size: row.get("size").and_then(JsonValue::as_u64).unwrap_or(0),
        conversation_id: row
            .get("conversation_id")
            .and_then(JsonValue::as_str)
            .map(str::to_string),
        created_at,
    })
}

#[async_trait]
impl AttachmentRegistry for SqliteAttachmentRegistry {
    async fn get_attachment(
        &self,
        _context: &ExecutionContext,
        id: Uuid,
    ) -> Result<Option<AttachmentMetadata>, AttachmentError> {
        let mut db = self.database.enter().await?;
        let row = db
            .fetch_one(
                "SELECT id, conversation_id, filename, description, mime_type, size, created_at
                 FROM attachments WHERE id = ?",
                &[id.to_string().into()],
            )
            .await;
        db.exit().await?;
        row?.as_ref().map(metadata_from_row).transpose()
    }

    async fn get_attachment_content(
        &self,
        _context: &ExecutionContext,
        id: Uuid,
    ) -> Result<Option<Vec<u8>>, AttachmentError> {
        let mut db = self.database.enter().await?;
        let row = db
            .fetch_one(
                "SELECT content FROM attachments WHERE id = ?",
                &[id.to_string().into()],
            )
            .await;
        db.exit().await?;
        let Some(row) = row? else {
            return Ok(None);
        };
        use base64::Engine as _;
        let encoded = row
            .get("content")
            .and_then(JsonValue::as_str)
            .ok_or_else(|| AttachmentError::Corrupt("missing content".to_string()))?;
        base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map(Some)
            .map_err(|e| AttachmentError::Corrupt(e.to_string()))
    }

    async fn store_and_register(
        &self,
        context: &ExecutionContext,
        attachment: NewAttachment,
    ) -> Result<AttachmentMetadata, AttachmentError> {
        let metadata = AttachmentMetadata {
            id: Uuid::new_v4(),
            filename: attachment.filename,
            description: attachment.description,
            mime_type: attachment.mime_type,
            size: attachment.content.len() as u64,
            conversation_id: Some(context.conversation_id.clone()),
            created_at: context.clock.now(),
        };
        let mut db = self.database.enter().await?;
        let inserted = db
            .execute_and_commit(
                "INSERT INTO attachments
                 (id, conversation_id, filename, description, mime_type, size, content, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                &[
                    metadata.id.to_string().into(),
                    metadata.conversation_id.clone().into(),
                    metadata.filename.clone().into(),
                    metadata.description.clone().into(),
                    metadata.mime_type.clone().into(),
                    SqlParam::Int(metadata.size as i64),
                    attachment.content.into(),
                    metadata.created_at.to_rfc3339().into(),
                ],
            )
            .await;
        db.exit().await?;
        inserted?;
        Ok(metadata)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn store_then_read_back() {
        let registry = SqliteAttachmentRegistry::new(Database::in_memory().await.expect("db"));
        let ctx = ExecutionContext::new("conv-1");
        let stored = registry
            .store_and_register(
                &ctx,
                NewAttachment {
                    content: b"shopping list".to_vec(),
                    filename: "list.txt".into(),
                    description: "weekly".into(),
                    mime_type: "text/plain".into(),
                },
            )
            .await
            .expect("store");
        assert_eq!(stored.size, 13);

        let meta = registry
            .get_attachment(&ctx, stored.id)
            .await
            .expect("get")
            .expect("exists");
        assert_eq!(meta.filename, "list.txt");
        assert_eq!(meta.conversation_id.as_deref(), Some("conv-1"));

        let content = registry
            .get_attachment_content(&ctx, stored.id)
            .await
            .expect("read")
            .expect("exists");
        assert_eq!(content, b"shopping list");
    }

    #[tokio::test]
    async fn unknown_id_is_none() {
        let registry = SqliteAttachmentRegistry::new(Database::in_memory().await.expect("db"));
        let ctx = ExecutionContext::new("c");
        assert!(registry.get_attachment(&ctx, Uuid::new_v4()).await.expect("get").is_none());
        assert!(
            registry
                .get_attachment_content(&ctx, Uuid::new_v4())
                .await
                .expect("read")
                .is_none()
        );
    }
}
