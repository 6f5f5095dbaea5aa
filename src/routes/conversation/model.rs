use serde::Deserialize;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct OpenDirectRequest {
    pub peer_id: Uuid,
}

/// 小组创建后为其建立会话
#[derive(Debug, Deserialize)]
pub struct CreateGroupConversationRequest {
    pub group_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct AddParticipantRequest {
    pub user_id: Uuid,
}
