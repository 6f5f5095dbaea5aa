pub mod store_tests;

use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::{EncodingKey, Header, encode};
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::AppState;
use crate::config::Config;
use crate::database::InMemoryStore;
use crate::database::models::{Conversation, Message, MessageKind, MessageStatus};
use crate::database::store::{ConversationDirectory, MessageStore};
use crate::error::ChatError;
use crate::realtime::{Connection, DeliveryCoordinator, RoomRouter, ServerEvent};
use crate::utils::Claims;

pub fn test_config() -> Config {
    Config {
        database_url: String::new(),
        redis_url: String::new(),
        jwt_secret: "test-secret".to_string(),
        server_host: "127.0.0.1".to_string(),
        server_port: 0,
        api_base_uri: "/api".to_string(),
        rate_limit_window_secs: 60,
        rate_limit_requests: 100,
        db_max_connections: 1,
        ws_send_buffer: 64,
    }
}

pub fn token_for(user_id: Uuid, config: &Config) -> String {
    let now = Utc::now().timestamp();
    let claims = Claims {
        sub: user_id.to_string(),
        exp: now + 3600,
        iat: now,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(config.jwt_secret.as_bytes()),
    )
    .expect("encode token")
}

pub fn connect(user_id: Uuid) -> (Connection, mpsc::Receiver<ServerEvent>) {
    let (tx, rx) = mpsc::channel(64);
    (Connection::new(user_id, tx), rx)
}

/// 取出队列中已有的全部事件
pub fn drain(rx: &mut mpsc::Receiver<ServerEvent>) -> Vec<ServerEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// 两个用户与一个私聊会话
pub struct Fixture {
    pub store: Arc<InMemoryStore>,
    pub coordinator: DeliveryCoordinator,
    pub conversation: Conversation,
    pub u1: Uuid,
    pub u2: Uuid,
}

pub async fn fixture() -> Fixture {
    let store = Arc::new(InMemoryStore::new());
    let (u1, u2) = (Uuid::new_v4(), Uuid::new_v4());
    let conversation = store
        .find_or_create_direct(u1, u2)
        .await
        .expect("create conversation");
    let coordinator =
        DeliveryCoordinator::new(Arc::new(RoomRouter::new()), store.clone(), store.clone());

    Fixture {
        store,
        coordinator,
        conversation,
        u1,
        u2,
    }
}

pub fn app_state(store: Arc<InMemoryStore>) -> AppState {
    AppState::new(test_config(), store.clone(), store)
}

/// 所有写入都失败的消息存储
pub struct FailingStore;

fn unavailable() -> ChatError {
    ChatError::Persistence(sqlx::Error::PoolTimedOut)
}

#[async_trait]
impl MessageStore for FailingStore {
    async fn append(
        &self,
        _conversation_id: Uuid,
        _sender_id: Uuid,
        _text: &str,
        _kind: MessageKind,
    ) -> Result<Message, ChatError> {
        Err(unavailable())
    }

    async fn list_by_conversation(&self, _conversation_id: Uuid) -> Result<Vec<Message>, ChatError> {
        Err(unavailable())
    }

    async fn update_status(
        &self,
        _conversation_id: Uuid,
        _message_id: Uuid,
        _status: MessageStatus,
    ) -> Result<Option<Message>, ChatError> {
        Err(unavailable())
    }

    async fn delete(&self, _message_id: Uuid) -> Result<bool, ChatError> {
        Err(unavailable())
    }

    async fn find(&self, _message_id: Uuid) -> Result<Option<Message>, ChatError> {
        Err(unavailable())
    }
}
