use axum::{
    extract::{Extension, Json, Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use super::model::{AddParticipantRequest, CreateGroupConversationRequest, OpenDirectRequest};
use crate::AppState;
use crate::error::ChatError;
use crate::utils::{Claims, success_to_api_response};

/// 用户的会话列表，附带最新消息、未读数与成员。只能查询自己的列表
#[axum::debug_handler]
pub async fn list_user_conversations(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(user_id): Path<Uuid>,
) -> Result<impl IntoResponse, ChatError> {
    if claims.user_id()? != user_id {
        return Err(ChatError::Forbidden(
            "Cannot list another user's conversations".into(),
        ));
    }

    let conversations = state.conversations.get_user_conversations(user_id).await?;
    tracing::debug!(
        "Listed {} conversations for user {}",
        conversations.len(),
        user_id
    );
    Ok((StatusCode::OK, success_to_api_response(conversations)))
}

/// 完整会话记录
#[axum::debug_handler]
pub async fn get_full_conversation(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(conversation_id): Path<Uuid>,
) -> Result<impl IntoResponse, ChatError> {
    let user_id = claims.user_id()?;
    let full = state
        .conversations
        .get_full_conversation(conversation_id)
        .await?
        .ok_or(ChatError::NotFound("conversation"))?;

    if !full.participants.iter().any(|p| p.user_id == user_id) {
        return Err(ChatError::Forbidden(
            "User is not a participant of this conversation".into(),
        ));
    }
    Ok((StatusCode::OK, success_to_api_response(full)))
}

#[axum::debug_handler]
pub async fn get_group_conversation(
    State(state): State<AppState>,
    Path(group_id): Path<Uuid>,
) -> Result<impl IntoResponse, ChatError> {
    let conversation = state
        .conversations
        .get_by_group_id(group_id)
        .await?
        .ok_or(ChatError::NotFound("conversation"))?;
    Ok((StatusCode::OK, success_to_api_response(conversation)))
}

#[axum::debug_handler]
pub async fn open_direct_conversation(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<OpenDirectRequest>,
) -> Result<impl IntoResponse, ChatError> {
    let conversation = state
        .conversations
        .find_or_create_direct(claims.user_id()?, req.peer_id)
        .await?;
    Ok((StatusCode::OK, success_to_api_response(conversation)))
}

#[axum::debug_handler]
pub async fn create_group_conversation(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateGroupConversationRequest>,
) -> Result<impl IntoResponse, ChatError> {
    let conversation = state
        .conversations
        .create_group_conversation(req.group_id, claims.user_id()?)
        .await?;
    Ok((StatusCode::CREATED, success_to_api_response(conversation)))
}

/// 小组加入或邀请通过后添加参与者，调用方须已在会话中
#[axum::debug_handler]
pub async fn add_participant(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(conversation_id): Path<Uuid>,
    Json(req): Json<AddParticipantRequest>,
) -> Result<impl IntoResponse, ChatError> {
    let caller = claims.user_id()?;
    if !state
        .conversations
        .is_participant(conversation_id, caller)
        .await?
    {
        return Err(ChatError::Forbidden(
            "User is not a participant of this conversation".into(),
        ));
    }

    let participant = state
        .conversations
        .add_participant(conversation_id, req.user_id)
        .await?;
    tracing::info!(
        "User {} added {} to conversation {}",
        caller,
        req.user_id,
        conversation_id
    );
    Ok((StatusCode::OK, success_to_api_response(participant)))
}
