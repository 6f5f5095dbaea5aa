// 会话实体
// 定义会话、参与者以及会话列表聚合结构

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::message::Message;

/// 会话类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConversationKind {
    /// 一对一私聊
    Direct,
    /// 学习小组会话
    Group,
}

impl ConversationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationKind::Direct => "direct",
            ConversationKind::Group => "group",
        }
    }

    pub fn from_db(value: &str) -> Self {
        match value {
            "group" => ConversationKind::Group,
            _ => ConversationKind::Direct,
        }
    }
}

/// 会话元数据。group 类型必有 group_id，direct 类型没有
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Conversation {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub kind: ConversationKind,
    pub group_id: Option<Uuid>,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
}

impl Conversation {
    /// 检查类型与 group_id 是否一致
    pub fn is_consistent(&self) -> bool {
        match self.kind {
            ConversationKind::Group => self.group_id.is_some(),
            ConversationKind::Direct => self.group_id.is_none(),
        }
    }
}

#[derive(Debug, FromRow)]
pub struct ConversationRow {
    pub id: Uuid,
    #[sqlx(rename = "type")]
    pub kind: String,
    pub group_id: Option<Uuid>,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
}

impl From<ConversationRow> for Conversation {
    fn from(row: ConversationRow) -> Self {
        let conversation = Conversation {
            id: row.id,
            kind: ConversationKind::from_db(&row.kind),
            group_id: row.group_id,
            created_by: row.created_by,
            created_at: row.created_at,
        };
        if !conversation.is_consistent() {
            tracing::warn!(
                "Conversation {} has type {} but group_id {:?}",
                conversation.id,
                row.kind,
                conversation.group_id
            );
        }
        conversation
    }
}

/// 会话参与者，(conversation_id, user_id) 唯一
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, FromRow)]
pub struct Participant {
    pub conversation_id: Uuid,
    pub user_id: Uuid,
    pub joined_at: DateTime<Utc>,
    pub last_read_at: Option<DateTime<Utc>>,
}

/// 完整会话：元数据 + 全部消息 + 全部参与者
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FullConversation {
    #[serde(flatten)]
    pub conversation: Conversation,
    pub messages: Vec<Message>,
    pub participants: Vec<Participant>,
}

/// 用户会话列表中的一项
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSummary {
    #[serde(flatten)]
    pub conversation: Conversation,
    pub last_message: Option<Message>,
    pub unread_count: i64,
    pub members: Vec<Participant>,
}
