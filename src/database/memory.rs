// 内存存储
// 与 Postgres 实现行为一致的进程内存储，用于测试和本地调试

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::database::models::{
    Conversation, ConversationKind, ConversationSummary, FullConversation, Message, MessageKind,
    MessageStatus, Participant,
};
use crate::database::store::{ConversationDirectory, MessageStore};
use crate::error::ChatError;

#[derive(Default)]
struct Inner {
    conversations: HashMap<Uuid, Conversation>,
    /// 按加入顺序保存
    participants: HashMap<Uuid, Vec<Participant>>,
    /// 按追加顺序保存
    messages: HashMap<Uuid, Vec<Message>>,
}

impl Inner {
    fn participant_mut(&mut self, conversation_id: Uuid, user_id: Uuid) -> Option<&mut Participant> {
        self.participants
            .get_mut(&conversation_id)?
            .iter_mut()
            .find(|p| p.user_id == user_id)
    }

    fn insert_conversation(
        &mut self,
        kind: ConversationKind,
        group_id: Option<Uuid>,
        created_by: Uuid,
        members: &[Uuid],
    ) -> Conversation {
        let now = Utc::now();
        let conversation = Conversation {
            id: Uuid::new_v4(),
            kind,
            group_id,
            created_by,
            created_at: now,
        };
        self.conversations.insert(conversation.id, conversation.clone());
        self.participants.insert(
            conversation.id,
            members
                .iter()
                .map(|&user_id| Participant {
                    conversation_id: conversation.id,
                    user_id,
                    joined_at: now,
                    last_read_at: None,
                })
                .collect(),
        );
        conversation
    }
}

/// 进程内存储，同时实现 MessageStore 与 ConversationDirectory
#[derive(Default)]
pub struct InMemoryStore {
    inner: RwLock<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessageStore for InMemoryStore {
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

        let mut inner = self.inner.write().await;
        if !inner.conversations.contains_key(&conversation_id) {
            return Err(ChatError::NotFound("conversation"));
        }

        let log = inner.messages.entry(conversation_id).or_default();
        // 时钟回拨时沿用上一条的时间，保证 sent_at 不递减
        let now = Utc::now();
        let sent_at = log.last().map_or(now, |last| last.sent_at.max(now));
        let message = Message {
            id: Uuid::new_v4(),
            conversation_id,
            sender_id,
            text: text.to_string(),
            kind,
            status: MessageStatus::Sent,
            sent_at,
            updated_at: None,
        };
        log.push(message.clone());
        Ok(message)
    }

    async fn list_by_conversation(&self, conversation_id: Uuid) -> Result<Vec<Message>, ChatError> {
        let inner = self.inner.read().await;
        Ok(inner
            .messages
            .get(&conversation_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn update_status(
        &self,
        conversation_id: Uuid,
        message_id: Uuid,
        status: MessageStatus,
    ) -> Result<Option<Message>, ChatError> {
        let mut inner = self.inner.write().await;
        let Some(message) = inner
            .messages
            .get_mut(&conversation_id)
            .and_then(|log| log.iter_mut().find(|m| m.id == message_id))
        else {
            return Ok(None);
        };

        message.status = status;
        message.updated_at = Some(Utc::now());
        Ok(Some(message.clone()))
    }

    async fn delete(&self, message_id: Uuid) -> Result<bool, ChatError> {
        let mut inner = self.inner.write().await;
        for log in inner.messages.values_mut() {
            if let Some(pos) = log.iter().position(|m| m.id == message_id) {
                log.remove(pos);
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn find(&self, message_id: Uuid) -> Result<Option<Message>, ChatError> {
        let inner = self.inner.read().await;
        Ok(inner
            .messages
            .values()
            .flat_map(|log| log.iter())
            .find(|m| m.id == message_id)
            .cloned())
    }
}

#[async_trait]
impl ConversationDirectory for InMemoryStore {
    async fn get_full_conversation(
        &self,
        conversation_id: Uuid,
    ) -> Result<Option<FullConversation>, ChatError> {
        let inner = self.inner.read().await;
        let Some(conversation) = inner.conversations.get(&conversation_id) else {
            return Ok(None);
        };

        Ok(Some(FullConversation {
            conversation: conversation.clone(),
            messages: inner
                .messages
                .get(&conversation_id)
                .cloned()
                .unwrap_or_default(),
            participants: inner
                .participants
                .get(&conversation_id)
                .cloned()
                .unwrap_or_default(),
        }))
    }

    async fn get_user_conversations(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<ConversationSummary>, ChatError> {
        let inner = self.inner.read().await;
        let mut summaries: Vec<ConversationSummary> = inner
            .participants
            .iter()
            .filter_map(|(conversation_id, members)| {
                let me = members.iter().find(|p| p.user_id == user_id)?;
                let conversation = inner.conversations.get(conversation_id)?.clone();
                let log = inner.messages.get(conversation_id);
                let read_mark = me.last_read_at.unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
                let unread_count = log
                    .map(|log| {
                        log.iter()
                            .filter(|m| m.sender_id != user_id && m.sent_at > read_mark)
                            .count() as i64
                    })
                    .unwrap_or(0);

                Some(ConversationSummary {
                    conversation,
                    last_message: log.and_then(|log| log.last().cloned()),
                    unread_count,
                    members: members.clone(),
                })
            })
            .collect();

        summaries.sort_by(|a, b| b.conversation.created_at.cmp(&a.conversation.created_at));
        Ok(summaries)
    }

    async fn get_by_group_id(&self, group_id: Uuid) -> Result<Option<Conversation>, ChatError> {
        let inner = self.inner.read().await;
        Ok(inner
            .conversations
            .values()
            .find(|c| c.group_id == Some(group_id))
            .cloned())
    }

    async fn is_participant(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> Result<bool, ChatError> {
        let inner = self.inner.read().await;
        Ok(inner
            .participants
            .get(&conversation_id)
            .is_some_and(|members| members.iter().any(|p| p.user_id == user_id)))
    }

    async fn mark_read(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<DateTime<Utc>>, ChatError> {
        let mut inner = self.inner.write().await;
        let Some(participant) = inner.participant_mut(conversation_id, user_id) else {
            return Ok(None);
        };

        let now = Utc::now();
        let last_read_at = participant.last_read_at.map_or(now, |prev| prev.max(now));
        participant.last_read_at = Some(last_read_at);
        Ok(Some(last_read_at))
    }

    async fn add_participant(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> Result<Participant, ChatError> {
        let mut inner = self.inner.write().await;
        if !inner.conversations.contains_key(&conversation_id) {
            return Err(ChatError::NotFound("conversation"));
        }
        if let Some(existing) = inner.participant_mut(conversation_id, user_id) {
            return Ok(existing.clone());
        }

        let participant = Participant {
            conversation_id,
            user_id,
            joined_at: Utc::now(),
            last_read_at: None,
        };
        inner
            .participants
            .entry(conversation_id)
            .or_default()
            .push(participant.clone());
        Ok(participant)
    }

    async fn create_group_conversation(
        &self,
        group_id: Uuid,
        creator_id: Uuid,
    ) -> Result<Conversation, ChatError> {
        let mut inner = self.inner.write().await;
        if let Some(existing) = inner
            .conversations
            .values()
            .find(|c| c.group_id == Some(group_id))
        {
            return Ok(existing.clone());
        }
        Ok(inner.insert_conversation(
            ConversationKind::Group,
            Some(group_id),
            creator_id,
            &[creator_id],
        ))
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

        let mut inner = self.inner.write().await;
        let existing = inner
            .conversations
            .values()
            .filter(|c| c.kind == ConversationKind::Direct)
            .filter(|c| {
                inner.participants.get(&c.id).is_some_and(|members| {
                    members.iter().any(|p| p.user_id == user_id)
                        && members.iter().any(|p| p.user_id == peer_id)
                })
            })
            .min_by_key(|c| c.created_at)
            .cloned();
        if let Some(conversation) = existing {
            return Ok(conversation);
        }

        Ok(inner.insert_conversation(ConversationKind::Direct, None, user_id, &[user_id, peer_id]))
    }
}
