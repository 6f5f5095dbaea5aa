use axum::{
    extract::{Extension, Json, Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use super::model::{CreateMessageRequest, DeleteMessageResponse, UpdateStatusRequest};
use crate::AppState;
use crate::error::ChatError;
use crate::utils::{Claims, success_to_api_response};

/// 调用方必须是会话参与者
async fn ensure_participant(
    state: &AppState,
    conversation_id: Uuid,
    user_id: Uuid,
) -> Result<(), ChatError> {
    if state
        .conversations
        .is_participant(conversation_id, user_id)
        .await?
    {
        Ok(())
    } else {
        Err(ChatError::Forbidden(
            "User is not a participant of this conversation".into(),
        ))
    }
}

/// 非实时发送，写入与实时通道相同的存储后同样广播到房间
#[axum::debug_handler]
pub async fn create_message(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateMessageRequest>,
) -> Result<impl IntoResponse, ChatError> {
    let user_id = claims.user_id()?;
    let (Some(conversation_id), Some(text)) = (req.conversation_id, req.message) else {
        return Err(ChatError::missing_fields());
    };
    ensure_participant(&state, conversation_id, user_id).await?;

    let message = state
        .messages
        .append(conversation_id, user_id, &text, req.kind)
        .await?;
    let delivered = state.coordinator.publish_message(&message, None);
    tracing::info!(
        "User {} posted message {} to conversation {} ({} live recipients)",
        user_id,
        message.id,
        conversation_id,
        delivered
    );

    Ok((StatusCode::CREATED, success_to_api_response(message)))
}

#[axum::debug_handler]
pub async fn list_messages(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(conversation_id): Path<Uuid>,
) -> Result<impl IntoResponse, ChatError> {
    ensure_participant(&state, conversation_id, claims.user_id()?).await?;

    let messages = state.messages.list_by_conversation(conversation_id).await?;
    Ok((StatusCode::OK, success_to_api_response(messages)))
}

#[axum::debug_handler]
pub async fn update_status(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path((conversation_id, message_id)): Path<(Uuid, Uuid)>,
    Json(req): Json<UpdateStatusRequest>,
) -> Result<impl IntoResponse, ChatError> {
    ensure_participant(&state, conversation_id, claims.user_id()?).await?;

    let message = state
        .messages
        .update_status(conversation_id, message_id, req.status)
        .await?
        .ok_or(ChatError::NotFound("message"))?;
    Ok((StatusCode::OK, success_to_api_response(message)))
}

/// 只有发送者可以删除；消息已不存在时返回 deleted=false
#[axum::debug_handler]
pub async fn delete_message(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(message_id): Path<Uuid>,
) -> Result<impl IntoResponse, ChatError> {
    let user_id = claims.user_id()?;

    let deleted = match state.messages.find(message_id).await? {
        None => false,
        Some(message) if message.sender_id != user_id => {
            return Err(ChatError::Forbidden(
                "Only the sender can delete this message".into(),
            ));
        }
        Some(_) => state.messages.delete(message_id).await?,
    };

    tracing::debug!("User {} deleted message {}: {}", user_id, message_id, deleted);
    Ok((
        StatusCode::OK,
        success_to_api_response(DeleteMessageResponse { deleted }),
    ))
}
