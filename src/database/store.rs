// 存储接口
// 实时投递与 REST 接口都只依赖这两个 trait，Postgres 与内存实现可以互换

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::database::models::{
    Conversation, ConversationSummary, FullConversation, Message, MessageKind, MessageStatus,
    Participant,
};
use crate::error::ChatError;

/// 消息存储：按会话追加、有序读取
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// 追加一条消息，sent_at 由服务端生成。
    /// 会话不存在返回 NotFound，正文为空返回 Validation
    async fn append(
        &self,
        conversation_id: Uuid,
        sender_id: Uuid,
        text: &str,
        kind: MessageKind,
    ) -> Result<Message, ChatError>;

    /// 按 sent_at 升序返回会话全部消息
    async fn list_by_conversation(&self, conversation_id: Uuid) -> Result<Vec<Message>, ChatError>;

    /// 没有匹配的消息时返回 None
    async fn update_status(
        &self,
        conversation_id: Uuid,
        message_id: Uuid,
        status: MessageStatus,
    ) -> Result<Option<Message>, ChatError>;

    /// 幂等删除，返回是否真的删除了一行
    async fn delete(&self, message_id: Uuid) -> Result<bool, ChatError>;

    async fn find(&self, message_id: Uuid) -> Result<Option<Message>, ChatError>;
}

/// 会话目录：会话身份、成员关系与聚合查询
#[async_trait]
pub trait ConversationDirectory: Send + Sync {
    async fn get_full_conversation(
        &self,
        conversation_id: Uuid,
    ) -> Result<Option<FullConversation>, ChatError>;

    /// 用户参与的全部会话，按 created_at 倒序
    async fn get_user_conversations(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<ConversationSummary>, ChatError>;

    async fn get_by_group_id(&self, group_id: Uuid) -> Result<Option<Conversation>, ChatError>;

    async fn is_participant(&self, conversation_id: Uuid, user_id: Uuid)
    -> Result<bool, ChatError>;

    /// 更新已读位置，只会向前移动。不是参与者时返回 None
    async fn mark_read(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<DateTime<Utc>>, ChatError>;

    /// 重复添加返回已有记录
    async fn add_participant(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> Result<Participant, ChatError>;

    /// 每个小组只对应一个会话，已存在时直接返回
    async fn create_group_conversation(
        &self,
        group_id: Uuid,
        creator_id: Uuid,
    ) -> Result<Conversation, ChatError>;

    async fn find_or_create_direct(
        &self,
        user_id: Uuid,
        peer_id: Uuid,
    ) -> Result<Conversation, ChatError>;
}
