use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::database::models::{MessageKind, MessageStatus};

/// 非实时的发送消息请求
#[derive(Debug, Deserialize)]
pub struct CreateMessageRequest {
    pub conversation_id: Option<Uuid>,
    pub message: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: MessageKind,
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: MessageStatus,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteMessageResponse {
    pub deleted: bool,
}
