// 消息存储库
// 包含消息相关的数据库操作

use async_trait::async_trait;
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

use crate::database::models::message::MessageRow;
use crate::database::models::{Message, MessageKind, MessageStatus};
use crate::database::store::MessageStore;
use crate::error::ChatError;

pub(crate) const MESSAGE_COLUMNS: &str =
    "id, conversation_id, sender_id, text, type, status, sent_at, updated_at";

/// 消息存储库，处理所有与消息相关的数据库操作
pub struct MessageOperation {
    db: Arc<PgPool>,
}

impl MessageOperation {
    /// 创建新的消息存储库实例
    pub fn new(db: Arc<PgPool>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl MessageStore for MessageOperation {
    async fn append(
        &self,
        conversation_id: Uuid,
        sender_id: Uuid,
        text: &str,
        kind: MessageKind,
    ) -> Result<Message, ChatError> {
        if text.trim().is_empty() {
            return Err(ChatError::Validation("Message text must not be empty".into()));
        }

        // 通过 INSERT ... SELECT 保证会话存在时才写入
        // clock_timestamp() 在同一事务内也会递增
        let query = format!(
            r#"
            INSERT INTO messages (id, conversation_id, sender_id, text, type, status, sent_at)
            SELECT $1, c.id, $3, $4, $5, 'sent', clock_timestamp()
            FROM conversations c
            WHERE c.id = $2
            RETURNING {MESSAGE_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, MessageRow>(&query)
            .bind(Uuid::new_v4())
            .bind(conversation_id)
            .bind(sender_id)
            .bind(text)
            .bind(kind.as_str())
            .fetch_optional(self.db.as_ref())
            .await
            .map_err(|e| {
                tracing::error!(
                    "Failed to persist message: conversation={} error={}",
                    conversation_id,
                    e
                );
                e
            })?;

        row.map(Message::from).ok_or(ChatError::NotFound("conversation"))
    }

    async fn list_by_conversation(&self, conversation_id: Uuid) -> Result<Vec<Message>, ChatError> {
        let query = format!(
            r#"
            SELECT {MESSAGE_COLUMNS}
            FROM messages
            WHERE conversation_id = $1
            ORDER BY sent_at ASC, id ASC
            "#
        );
        let rows = sqlx::query_as::<_, MessageRow>(&query)
            .bind(conversation_id)
            .fetch_all(self.db.as_ref())
            .await?;

        Ok(rows.into_iter().map(Message::from).collect())
    }

    async fn update_status(
        &self,
        conversation_id: Uuid,
        message_id: Uuid,
        status: MessageStatus,
    ) -> Result<Option<Message>, ChatError> {
        let query = format!(
            r#"
            UPDATE messages
            SET status = $3, updated_at = NOW()
            WHERE conversation_id = $1 AND id = $2
            RETURNING {MESSAGE_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, MessageRow>(&query)
            .bind(conversation_id)
            .bind(message_id)
            .bind(status.as_str())
            .fetch_optional(self.db.as_ref())
            .await?;

        Ok(row.map(Message::from))
    }

    async fn delete(&self, message_id: Uuid) -> Result<bool, ChatError> {
        let result = sqlx::query("DELETE FROM messages WHERE id = $1")
            .bind(message_id)
            .execute(self.db.as_ref())
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn find(&self, message_id: Uuid) -> Result<Option<Message>, ChatError> {
        let query = format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = $1");
        let row = sqlx::query_as::<_, MessageRow>(&query)
            .bind(message_id)
            .fetch_optional(self.db.as_ref())
            .await?;

        Ok(row.map(Message::from))
    }
}
