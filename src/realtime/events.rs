// 实时事件定义
// 入站帧: {"event": "...", "data": {...}, "ack": 1}
// 出站帧: {"event": "...", "data": {...}}

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::database::models::{Message, MessageKind};
use crate::error::ChatError;

/// 客户端发来的原始帧，事件名决定 data 的结构
#[derive(Debug, Deserialize)]
pub struct ClientFrame {
    pub event: String,
    #[serde(default)]
    pub data: Value,
    /// 客户端希望收到确认时携带
    #[serde(default)]
    pub ack: Option<u64>,
}

/// 只涉及会话与用户的事件载荷
#[derive(Debug, Default, Clone, Deserialize)]
pub struct ConversationPayload {
    pub conversation_id: Option<Uuid>,
    pub user_id: Option<Uuid>,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct SendMessagePayload {
    pub conversation_id: Option<Uuid>,
    pub message: Option<String>,
    pub user_id: Option<Uuid>,
    #[serde(rename = "type")]
    pub kind: Option<MessageKind>,
}

/// 入站事件
#[derive(Debug, Clone)]
pub enum ClientEvent {
    JoinConversation(ConversationPayload),
    LeaveConversation(ConversationPayload),
    SendMessage(SendMessagePayload),
    AllMessagesRead(ConversationPayload),
    UserTyping(ConversationPayload),
    UserStopTyping(ConversationPayload),
    Ping,
}

impl ClientEvent {
    pub fn parse(event: &str, data: Value) -> Result<Self, ChatError> {
        let event = match event {
            "join_conversation" => ClientEvent::JoinConversation(payload(data)?),
            "leave_conversation" => ClientEvent::LeaveConversation(payload(data)?),
            "send_message" => ClientEvent::SendMessage(payload(data)?),
            "all_messages_read" => ClientEvent::AllMessagesRead(payload(data)?),
            "user_typing" => ClientEvent::UserTyping(payload(data)?),
            "user_stop_typing" => ClientEvent::UserStopTyping(payload(data)?),
            "ping" => ClientEvent::Ping,
            other => return Err(ChatError::Validation(format!("Unknown event: {other}"))),
        };
        Ok(event)
    }

    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::JoinConversation(_) => "join_conversation",
            ClientEvent::LeaveConversation(_) => "leave_conversation",
            ClientEvent::SendMessage(_) => "send_message",
            ClientEvent::AllMessagesRead(_) => "all_messages_read",
            ClientEvent::UserTyping(_) => "user_typing",
            ClientEvent::UserStopTyping(_) => "user_stop_typing",
            ClientEvent::Ping => "ping",
        }
    }
}

fn payload<T: DeserializeOwned + Default>(data: Value) -> Result<T, ChatError> {
    if data.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(data)
        .map_err(|e| ChatError::Validation(format!("Malformed event payload: {e}")))
}

/// 服务端推送事件
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    JoinedConversation {
        conversation_id: Uuid,
        success: bool,
    },
    MessageReceived {
        conversation_id: Uuid,
        message: String,
        user_id: Uuid,
        message_id: Uuid,
        delivered_at: DateTime<Utc>,
    },
    /// unread_count 固定为 1，仅作提示，真实未读数以会话列表接口为准
    ConversationUpdated {
        conversation_id: Uuid,
        last_message: String,
        last_message_at: DateTime<Utc>,
        sender_id: Uuid,
        unread_count: i64,
    },
    MessageRead {
        conversation_id: Uuid,
        user_id: Uuid,
        last_read_at: DateTime<Utc>,
    },
    UserTyping {
        conversation_id: Uuid,
        user_id: Uuid,
        #[serde(rename = "isTyping")]
        is_typing: bool,
    },
    UserStopTyping {
        conversation_id: Uuid,
        user_id: Uuid,
    },
    Ack(AckFrame),
}

impl ServerEvent {
    pub fn message_received(message: &Message) -> Self {
        ServerEvent::MessageReceived {
            conversation_id: message.conversation_id,
            message: message.text.clone(),
            user_id: message.sender_id,
            message_id: message.id,
            delivered_at: message.sent_at,
        }
    }

    pub fn conversation_updated(message: &Message) -> Self {
        ServerEvent::ConversationUpdated {
            conversation_id: message.conversation_id,
            last_message: message.text.clone(),
            last_message_at: message.sent_at,
            sender_id: message.sender_id,
            unread_count: 1,
        }
    }
}

/// 对某个入站帧的确认
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AckFrame {
    /// 客户端帧里的 ack 编号，无编号的 ping 回复不带此字段
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ack: Option<u64>,
    #[serde(flatten)]
    pub reply: AckReply,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AckReply {
    Delivered {
        message_id: Uuid,
        delivered_at: DateTime<Utc>,
    },
    Error {
        message: String,
    },
    Pong {
        timestamp: DateTime<Utc>,
    },
}

impl AckReply {
    pub fn delivered(message: &Message) -> Self {
        AckReply::Delivered {
            message_id: message.id,
            delivered_at: message.sent_at,
        }
    }

    pub fn error(err: &ChatError) -> Self {
        AckReply::Error {
            message: err.client_message(),
        }
    }

    pub fn pong() -> Self {
        AckReply::Pong {
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ack_frames_carry_status_next_to_ack_id() {
        let message_id = Uuid::new_v4();
        let delivered_at = Utc::now();
        let event = ServerEvent::Ack(AckFrame {
            ack: Some(7),
            reply: AckReply::Delivered {
                message_id,
                delivered_at,
            },
        });

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], "ack");
        assert_eq!(value["data"]["ack"], 7);
        assert_eq!(value["data"]["status"], "delivered");
        assert_eq!(value["data"]["message_id"], json!(message_id));
    }

    #[test]
    fn unsolicited_pong_omits_ack_id() {
        let event = ServerEvent::Ack(AckFrame {
            ack: None,
            reply: AckReply::pong(),
        });

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["data"]["status"], "pong");
        assert!(value["data"].get("ack").is_none());
        assert!(value["data"]["timestamp"].is_string());
    }

    #[test]
    fn typing_event_uses_camel_case_flag() {
        let event = ServerEvent::UserTyping {
            conversation_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            is_typing: true,
        };

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], "user_typing");
        assert_eq!(value["data"]["isTyping"], true);
    }

    #[test]
    fn missing_data_parses_to_empty_payload() {
        let event = ClientEvent::parse("leave_conversation", Value::Null).unwrap();
        match event {
            ClientEvent::LeaveConversation(p) => assert!(p.conversation_id.is_none()),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn unknown_and_malformed_events_are_validation_errors() {
        assert!(matches!(
            ClientEvent::parse("shout", Value::Null),
            Err(ChatError::Validation(_))
        ));
        assert!(matches!(
            ClientEvent::parse("send_message", json!({"conversation_id": "not-a-uuid"})),
            Err(ChatError::Validation(_))
        ));
    }

    #[test]
    fn send_payload_reads_optional_type() {
        let event = ClientEvent::parse(
            "send_message",
            json!({
                "conversation_id": Uuid::new_v4(),
                "user_id": Uuid::new_v4(),
                "message": "hi",
                "type": "image"
            }),
        )
        .unwrap();
        match event {
            ClientEvent::SendMessage(p) => assert_eq!(p.kind, Some(MessageKind::Image)),
            other => panic!("unexpected event {other:?}"),
        }
    }
}
