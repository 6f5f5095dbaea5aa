// 会话存储库
// 会话、参与者与会话列表聚合查询

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use super::message::MESSAGE_COLUMNS;
use crate::database::models::conversation::ConversationRow;
use crate::database::models::message::MessageRow;
use crate::database::models::{
    Conversation, ConversationKind, ConversationSummary, FullConversation, Message, Participant,
};
use crate::database::store::ConversationDirectory;
use crate::error::ChatError;

const CONVERSATION_COLUMNS: &str = "c.id, c.type, c.group_id, c.created_by, c.created_at";
const PARTICIPANT_COLUMNS: &str = "conversation_id, user_id, joined_at, last_read_at";

/// 会话存储库，处理会话与参与者相关的数据库操作
pub struct ConversationOperation {
    db: Arc<PgPool>,
}

impl ConversationOperation {
    /// 创建新的会话存储库实例
    pub fn new(db: Arc<PgPool>) -> Self {
        Self { db }
    }

    async fn find_by_id(&self, conversation_id: Uuid) -> Result<Option<Conversation>, ChatError> {
        let query = format!("SELECT {CONVERSATION_COLUMNS} FROM conversations c WHERE c.id = $1");
        let row = sqlx::query_as::<_, ConversationRow>(&query)
            .bind(conversation_id)
            .fetch_optional(self.db.as_ref())
            .await?;

        Ok(row.map(Conversation::from))
    }

    async fn find_participant(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<Participant>, ChatError> {
        let query = format!(
            "SELECT {PARTICIPANT_COLUMNS} FROM conversation_participants \
             WHERE conversation_id = $1 AND user_id = $2"
        );
        let participant = sqlx::query_as::<_, Participant>(&query)
            .bind(conversation_id)
            .bind(user_id)
            .fetch_optional(self.db.as_ref())
            .await?;

        Ok(participant)
    }
}

#[async_trait]
impl ConversationDirectory for ConversationOperation {
    async fn get_full_conversation(
        &self,
        conversation_id: Uuid,
    ) -> Result<Option<FullConversation>, ChatError> {
        let Some(conversation) = self.find_by_id(conversation_id).await? else {
            return Ok(None);
        };

        let query = format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE conversation_id = $1 \
             ORDER BY sent_at ASC, id ASC"
        );
        let messages = sqlx::query_as::<_, MessageRow>(&query)
            .bind(conversation_id)
            .fetch_all(self.db.as_ref())
            .await?
            .into_iter()
            .map(Message::from)
            .collect();

        let query = format!(
            "SELECT {PARTICIPANT_COLUMNS} FROM conversation_participants \
             WHERE conversation_id = $1 ORDER BY joined_at ASC"
        );
        let participants = sqlx::query_as::<_, Participant>(&query)
            .bind(conversation_id)
            .fetch_all(self.db.as_ref())
            .await?;

        Ok(Some(FullConversation {
            conversation,
            messages,
            participants,
        }))
    }

    async fn get_user_conversations(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<ConversationSummary>, ChatError> {
        let query = format!(
            r#"
            SELECT {CONVERSATION_COLUMNS}
            FROM conversations c
            JOIN conversation_participants cp ON cp.conversation_id = c.id
            WHERE cp.user_id = $1
            ORDER BY c.created_at DESC
            "#
        );
        let conversations: Vec<Conversation> = sqlx::query_as::<_, ConversationRow>(&query)
            .bind(user_id)
            .fetch_all(self.db.as_ref())
            .await?
            .into_iter()
            .map(Conversation::from)
            .collect();

        if conversations.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<Uuid> = conversations.iter().map(|c| c.id).collect();

        // 每个会话最新的一条消息
        let query = format!(
            r#"
            SELECT DISTINCT ON (conversation_id) {MESSAGE_COLUMNS}
            FROM messages
            WHERE conversation_id = ANY($1)
            ORDER BY conversation_id, sent_at DESC, id DESC
            "#
        );
        let mut last_messages: HashMap<Uuid, Message> = sqlx::query_as::<_, MessageRow>(&query)
            .bind(&ids)
            .fetch_all(self.db.as_ref())
            .await?
            .into_iter()
            .map(|row| (row.conversation_id, Message::from(row)))
            .collect();

        // 未读数：他人发送且晚于 last_read_at 的消息，last_read_at 为空时按纪元时间处理
        let mut unread: HashMap<Uuid, i64> = sqlx::query_as::<_, (Uuid, i64)>(
            r#"
            SELECT m.conversation_id, COUNT(*) AS unread_count
            FROM messages m
            JOIN conversation_participants cp
                ON cp.conversation_id = m.conversation_id AND cp.user_id = $1
            WHERE m.sender_id <> $1
                AND m.sent_at > COALESCE(cp.last_read_at, 'epoch'::timestamptz)
            GROUP BY m.conversation_id
            "#,
        )
        .bind(user_id)
        .fetch_all(self.db.as_ref())
        .await?
        .into_iter()
        .collect();

        let query = format!(
            "SELECT {PARTICIPANT_COLUMNS} FROM conversation_participants \
             WHERE conversation_id = ANY($1) ORDER BY joined_at ASC"
        );
        let mut members: HashMap<Uuid, Vec<Participant>> = HashMap::new();
        for participant in sqlx::query_as::<_, Participant>(&query)
            .bind(&ids)
            .fetch_all(self.db.as_ref())
            .await?
        {
            members
                .entry(participant.conversation_id)
                .or_default()
                .push(participant);
        }

        tracing::debug!(
            "User {} has {} conversations",
            user_id,
            conversations.len()
        );

        Ok(conversations
            .into_iter()
            .map(|conversation| {
                let id = conversation.id;
                ConversationSummary {
                    conversation,
                    last_message: last_messages.remove(&id),
                    unread_count: unread.remove(&id).unwrap_or(0),
                    members: members.remove(&id).unwrap_or_default(),
                }
            })
            .collect())
    }

    async fn get_by_group_id(&self, group_id: Uuid) -> Result<Option<Conversation>, ChatError> {
        let query =
            format!("SELECT {CONVERSATION_COLUMNS} FROM conversations c WHERE c.group_id = $1");
        let row = sqlx::query_as::<_, ConversationRow>(&query)
            .bind(group_id)
            .fetch_optional(self.db.as_ref())
            .await?;

        Ok(row.map(Conversation::from))
    }

    async fn is_participant(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> Result<bool, ChatError> {
        let (exists,) = sqlx::query_as::<_, (bool,)>(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM conversation_participants
                WHERE conversation_id = $1 AND user_id = $2
            )
            "#,
        )
        .bind(conversation_id)
        .bind(user_id)
        .fetch_one(self.db.as_ref())
        .await?;

        Ok(exists)
    }

    async fn mark_read(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<DateTime<Utc>>, ChatError> {
        // GREATEST 忽略 NULL，保证 last_read_at 不会回退
        let row = sqlx::query_as::<_, (Option<DateTime<Utc>>,)>(
            r#"
            UPDATE conversation_participants
            SET last_read_at = GREATEST(last_read_at, NOW())
            WHERE conversation_id = $1 AND user_id = $2
            RETURNING last_read_at
            "#,
        )
        .bind(conversation_id)
        .bind(user_id)
        .fetch_optional(self.db.as_ref())
        .await?;

        Ok(row.and_then(|(last_read_at,)| last_read_at))
    }

    async fn add_participant(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> Result<Participant, ChatError> {
        sqlx::query(
            r#"
            INSERT INTO conversation_participants (id, conversation_id, user_id, joined_at)
            SELECT $1, c.id, $3, NOW()
            FROM conversations c
            WHERE c.id = $2
            ON CONFLICT (conversation_id, user_id) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(conversation_id)
        .bind(user_id)
        .execute(self.db.as_ref())
        .await?;

        self.find_participant(conversation_id, user_id)
            .await?
            .ok_or(ChatError::NotFound("conversation"))
    }

    async fn create_group_conversation(
        &self,
        group_id: Uuid,
        creator_id: Uuid,
    ) -> Result<Conversation, ChatError> {
        let mut tx = self.db.begin().await?;

        // group_id 唯一，并发创建时只有一条会成功
        sqlx::query(
            r#"
            INSERT INTO conversations (id, type, group_id, created_by, created_at)
            VALUES ($1, $2, $3, $4, NOW())
            ON CONFLICT (group_id) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(ConversationKind::Group.as_str())
        .bind(group_id)
        .bind(creator_id)
        .execute(&mut *tx)
        .await?;

        let query =
            format!("SELECT {CONVERSATION_COLUMNS} FROM conversations c WHERE c.group_id = $1");
        let conversation: Conversation = sqlx::query_as::<_, ConversationRow>(&query)
            .bind(group_id)
            .fetch_one(&mut *tx)
            .await?
            .into();

        sqlx::query(
            r#"
            INSERT INTO conversation_participants (id, conversation_id, user_id, joined_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (conversation_id, user_id) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(conversation.id)
        .bind(conversation.created_by)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::info!(
            "Group {} conversation ready: {}",
            group_id,
            conversation.id
        );
        Ok(conversation)
    }

    async fn find_or_create_direct(
        &self,
        user_id: Uuid,
        peer_id: Uuid,
    ) -> Result<Conversation, ChatError> {
        if user_id == peer_id {
            return Err(ChatError::Validation(
                "Cannot open a direct conversation with yourself".into(),
            ));
        }

        let mut tx = self.db.begin().await?;

        // 按有序的用户对加事务级咨询锁，同一对用户的创建串行执行
        let (low, high) = if user_id < peer_id {
            (user_id, peer_id)
        } else {
            (peer_id, user_id)
        };
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
            .bind(format!("direct:{low}:{high}"))
            .execute(&mut *tx)
            .await?;

        let query = format!(
            r#"
            SELECT {CONVERSATION_COLUMNS}
            FROM conversations c
            JOIN conversation_participants a ON a.conversation_id = c.id AND a.user_id = $1
            JOIN conversation_participants b ON b.conversation_id = c.id AND b.user_id = $2
            WHERE c.type = 'direct'
            ORDER BY c.created_at ASC
            LIMIT 1
            "#
        );
        if let Some(row) = sqlx::query_as::<_, ConversationRow>(&query)
            .bind(user_id)
            .bind(peer_id)
            .fetch_optional(&mut *tx)
            .await?
        {
            tx.commit().await?;
            return Ok(row.into());
        }

        let conversation: Conversation = sqlx::query_as::<_, ConversationRow>(
            r#"
            INSERT INTO conversations (id, type, group_id, created_by, created_at)
            VALUES ($1, 'direct', NULL, $2, NOW())
            RETURNING id, type, group_id, created_by, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .fetch_one(&mut *tx)
        .await?
        .into();

        for member in [user_id, peer_id] {
            sqlx::query(
                r#"
                INSERT INTO conversation_participants (id, conversation_id, user_id, joined_at)
                VALUES ($1, $2, $3, NOW())
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(conversation.id)
            .bind(member)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        tracing::info!(
            "Created direct conversation {}: {} <-> {}",
            conversation.id,
            user_id,
            peer_id
        );
        Ok(conversation)
    }
}
