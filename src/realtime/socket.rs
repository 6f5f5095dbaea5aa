// WebSocket 接入
// 握手时校验令牌，之后每个连接一个读循环、一个写任务

use axum::{
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use axum_extra::{
    TypedHeader,
    headers::{Authorization, authorization::Bearer},
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::coordinator::DeliveryCoordinator;
use super::events::ServerEvent;
use super::room::Connection;
use crate::AppState;
use crate::error::ChatError;
use crate::utils::verify_token;

#[derive(Debug, Deserialize)]
pub struct SocketQuery {
    /// 浏览器无法在握手时设置请求头，令牌可以放在查询参数里
    pub token: Option<String>,
}

pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<SocketQuery>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
) -> Result<Response, ChatError> {
    let token = query
        .token
        .or_else(|| bearer.map(|TypedHeader(Authorization(b))| b.token().to_string()))
        .ok_or(ChatError::Unauthorized)?;
    let claims = verify_token(&token, &state.config).map_err(|e| {
        tracing::warn!("WebSocket handshake rejected: {}", e);
        ChatError::Unauthorized
    })?;
    let user_id = claims.user_id()?;

    let coordinator = state.coordinator.clone();
    let buffer = state.config.ws_send_buffer;
    Ok(ws.on_upgrade(move |socket| serve_connection(socket, coordinator, user_id, buffer)))
}

/// 单个连接的事件循环，同一连接的事件按到达顺序逐个处理
pub async fn serve_connection(
    socket: WebSocket,
    coordinator: Arc<DeliveryCoordinator>,
    user_id: Uuid,
    buffer: usize,
) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::channel::<ServerEvent>(buffer.max(1));
    let connection = Connection::new(user_id, tx);
    let connection_id = connection.id();
    tracing::info!("User {} connected as {}", user_id, connection_id);

    let writer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(e) => {
                    tracing::error!("Failed to encode outbound event: {}", e);
                    continue;
                }
            };
            if let Err(e) = sink.send(Message::Text(text.into())).await {
                tracing::debug!("Connection {} write failed: {}", connection_id, e);
                break;
            }
        }
    });

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => coordinator.dispatch_text(&connection, text.as_str()).await,
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                let err = ChatError::Transport(e.to_string());
                tracing::warn!("Connection {} closed with error: {}", connection_id, err);
                break;
            }
        }
    }

    let rooms = coordinator.router().disconnect(connection_id);
    drop(connection);
    writer.abort();
    tracing::info!(
        "User {} disconnected ({}), left {} rooms",
        user_id,
        connection_id,
        rooms
    );
}
