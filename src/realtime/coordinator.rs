// 实时投递协调器
// 校验入站事件，先持久化再向房间广播，并生成给发送方的确认

use std::sync::Arc;
use uuid::Uuid;

use super::events::{
    AckFrame, AckReply, ClientEvent, ClientFrame, ConversationPayload, SendMessagePayload,
    ServerEvent,
};
use super::room::{Connection, RoomRouter};
use crate::database::models::Message;
use crate::database::store::{ConversationDirectory, MessageStore};
use crate::error::ChatError;

/// 实时投递协调器
///
/// 在启动时显式构造并放进应用状态，需要推送事件的组件（包括 REST 接口）
/// 都通过它来广播。
///
/// 确认约定：`send_message` 成功时返回确认；`ping` 总会收到 pong，
/// 没带 ack 编号时确认帧里不含 ack 字段。任何事件失败时，
/// 只要客户端带了 ack 编号就会收到 `{status:"error"}`。其余事件成功时不回复。
///
/// 确认与加入结果走 `Connection::reply`，不会因队列已满被丢弃。
pub struct DeliveryCoordinator {
    router: Arc<RoomRouter>,
    messages: Arc<dyn MessageStore>,
    conversations: Arc<dyn ConversationDirectory>,
}

impl DeliveryCoordinator {
    pub fn new(
        router: Arc<RoomRouter>,
        messages: Arc<dyn MessageStore>,
        conversations: Arc<dyn ConversationDirectory>,
    ) -> Self {
        Self {
            router,
            messages,
            conversations,
        }
    }

    pub fn router(&self) -> &Arc<RoomRouter> {
        &self.router
    }

    /// 处理一条 JSON 文本帧，需要确认时通过连接回写 ack
    pub async fn dispatch_text(&self, connection: &Connection, text: &str) {
        let frame: ClientFrame = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(
                    "Dropping unparseable frame from connection {}: {}",
                    connection.id(),
                    e
                );
                return;
            }
        };

        let reply = match ClientEvent::parse(&frame.event, frame.data) {
            Ok(event) => self.handle(connection, event).await,
            Err(e) => {
                tracing::warn!("Rejected event from connection {}: {}", connection.id(), e);
                Some(AckReply::error(&e))
            }
        };

        let frame = match (frame.ack, reply) {
            (Some(ack), Some(reply)) => AckFrame {
                ack: Some(ack),
                reply,
            },
            (None, Some(reply @ AckReply::Pong { .. })) => AckFrame { ack: None, reply },
            _ => return,
        };
        if let Err(e) = connection.reply(ServerEvent::Ack(frame)).await {
            tracing::debug!("Ack for connection {} not sent: {}", connection.id(), e);
        }
    }

    /// 处理一条入站事件，返回应当回给调用方的确认
    pub async fn handle(&self, connection: &Connection, event: ClientEvent) -> Option<AckReply> {
        let name = event.name();
        let result = match event {
            ClientEvent::JoinConversation(p) => self.join_conversation(connection, p).await.map(|_| None),
            ClientEvent::LeaveConversation(p) => self.leave_conversation(connection, p).map(|_| None),
            ClientEvent::SendMessage(p) => self
                .send_message(connection, p)
                .await
                .map(|message| Some(AckReply::delivered(&message))),
            ClientEvent::AllMessagesRead(p) => self.mark_all_read(connection, p).await.map(|_| None),
            ClientEvent::UserTyping(p) => self.typing(connection, p, true).map(|_| None),
            ClientEvent::UserStopTyping(p) => self.typing(connection, p, false).map(|_| None),
            ClientEvent::Ping => Ok(Some(AckReply::pong())),
        };

        match result {
            Ok(reply) => reply,
            Err(e) => {
                match &e {
                    ChatError::Persistence(_) | ChatError::Transport(_) => tracing::error!(
                        "{} failed for connection {}: {}",
                        name,
                        connection.id(),
                        e
                    ),
                    _ => tracing::warn!(
                        "{} rejected for connection {}: {}",
                        name,
                        connection.id(),
                        e
                    ),
                }
                Some(AckReply::error(&e))
            }
        }
    }

    pub async fn join_conversation(
        &self,
        connection: &Connection,
        payload: ConversationPayload,
    ) -> Result<(), ChatError> {
        let (Some(conversation_id), Some(user_id)) = (payload.conversation_id, payload.user_id)
        else {
            return Err(ChatError::missing_fields());
        };
        authorize(connection, user_id)?;

        if !self
            .conversations
            .is_participant(conversation_id, user_id)
            .await?
        {
            connection
                .reply(ServerEvent::JoinedConversation {
                    conversation_id,
                    success: false,
                })
                .await?;
            return Err(ChatError::Forbidden(
                "User is not a participant of this conversation".into(),
            ));
        }

        self.router.join(connection, conversation_id);
        connection
            .reply(ServerEvent::JoinedConversation {
                conversation_id,
                success: true,
            })
            .await
    }

    pub fn leave_conversation(
        &self,
        connection: &Connection,
        payload: ConversationPayload,
    ) -> Result<(), ChatError> {
        let Some(conversation_id) = payload.conversation_id else {
            return Err(ChatError::missing_fields());
        };

        self.router.leave(connection.id(), conversation_id);
        Ok(())
    }

    /// 持久化成功后才广播；写入失败时不会有任何房间事件
    pub async fn send_message(
        &self,
        connection: &Connection,
        payload: SendMessagePayload,
    ) -> Result<Message, ChatError> {
        let (Some(conversation_id), Some(text), Some(user_id)) =
            (payload.conversation_id, payload.message, payload.user_id)
        else {
            return Err(ChatError::missing_fields());
        };
        if text.trim().is_empty() {
            return Err(ChatError::missing_fields());
        }
        authorize(connection, user_id)?;

        if !self
            .conversations
            .is_participant(conversation_id, user_id)
            .await?
        {
            return Err(ChatError::Forbidden(
                "User is not a participant of this conversation".into(),
            ));
        }

        let message = self
            .messages
            .append(conversation_id, user_id, &text, payload.kind.unwrap_or_default())
            .await?;

        self.publish_message(&message, Some(connection.id()));
        tracing::debug!(
            "Message {} delivered to conversation {}",
            message.id,
            conversation_id
        );
        Ok(message)
    }

    /// 广播一条已持久化的消息：message_received 排除 exclude，conversation_updated 发给整个房间
    pub fn publish_message(&self, message: &Message, exclude: Option<Uuid>) -> usize {
        let received = self.router.broadcast(
            message.conversation_id,
            ServerEvent::message_received(message),
            exclude,
        );
        self.router.broadcast(
            message.conversation_id,
            ServerEvent::conversation_updated(message),
            None,
        );
        received
    }

    pub async fn mark_all_read(
        &self,
        connection: &Connection,
        payload: ConversationPayload,
    ) -> Result<(), ChatError> {
        let (Some(conversation_id), Some(user_id)) = (payload.conversation_id, payload.user_id)
        else {
            return Err(ChatError::missing_fields());
        };
        authorize(connection, user_id)?;

        let Some(last_read_at) = self
            .conversations
            .mark_read(conversation_id, user_id)
            .await?
        else {
            return Err(ChatError::Forbidden(
                "User is not a participant of this conversation".into(),
            ));
        };

        self.router.broadcast(
            conversation_id,
            ServerEvent::MessageRead {
                conversation_id,
                user_id,
                last_read_at,
            },
            None,
        );
        Ok(())
    }

    /// 输入状态不落库，只转发给已在房间内的其他连接
    pub fn typing(
        &self,
        connection: &Connection,
        payload: ConversationPayload,
        is_typing: bool,
    ) -> Result<(), ChatError> {
        let (Some(conversation_id), Some(user_id)) = (payload.conversation_id, payload.user_id)
        else {
            return Err(ChatError::missing_fields());
        };
        authorize(connection, user_id)?;

        if !self.router.is_member(connection.id(), conversation_id) {
            return Err(ChatError::Forbidden(
                "Join the conversation before sending typing events".into(),
            ));
        }

        let event = if is_typing {
            ServerEvent::UserTyping {
                conversation_id,
                user_id,
                is_typing: true,
            }
        } else {
            ServerEvent::UserStopTyping {
                conversation_id,
                user_id,
            }
        };
        self.router
            .broadcast(conversation_id, event, Some(connection.id()));
        Ok(())
    }
}

/// 事件里的 user_id 必须是握手时认证的用户
fn authorize(connection: &Connection, user_id: Uuid) -> Result<(), ChatError> {
    if connection.user_id() != user_id {
        return Err(ChatError::Validation(
            "user_id does not match the authenticated user".into(),
        ));
    }
    Ok(())
}
