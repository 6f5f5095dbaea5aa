use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::utils::{error_codes, error_to_api_response};

/// 消息子系统的统一错误类型
#[derive(Debug, Error)]
pub enum ChatError {
    /// 缺少字段或字段格式错误
    #[error("{0}")]
    Validation(String),
    /// 会话或消息不存在
    #[error("{0} not found")]
    NotFound(&'static str),
    /// 缺少或无效的令牌
    #[error("Unauthorized")]
    Unauthorized,
    /// 用户无权访问该会话
    #[error("{0}")]
    Forbidden(String),
    /// 持久化写入或查询失败
    #[error("persistence error: {0}")]
    Persistence(#[from] sqlx::Error),
    /// 连接层错误
    #[error("transport error: {0}")]
    Transport(String),
}

impl ChatError {
    pub fn missing_fields() -> Self {
        ChatError::Validation("Missing required fields".to_string())
    }

    /// 返回给客户端的错误描述，不暴露数据库细节
    pub fn client_message(&self) -> String {
        match self {
            ChatError::Persistence(_) => "Failed to persist message".to_string(),
            ChatError::Transport(_) => "Connection error".to_string(),
            other => other.to_string(),
        }
    }

    fn status_and_code(&self) -> (StatusCode, i32) {
        match self {
            ChatError::Validation(_) => (StatusCode::BAD_REQUEST, error_codes::VALIDATION_ERROR),
            ChatError::NotFound(_) => (StatusCode::NOT_FOUND, error_codes::NOT_FOUND),
            ChatError::Unauthorized => (StatusCode::UNAUTHORIZED, error_codes::AUTH_FAILED),
            ChatError::Forbidden(_) => (StatusCode::FORBIDDEN, error_codes::PERMISSION_DENIED),
            ChatError::Persistence(_) | ChatError::Transport(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_codes::INTERNAL_ERROR,
            ),
        }
    }
}

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        }
        (status, error_to_api_response::<()>(code, self.client_message())).into_response()
    }
}
