use config::Config;
use std::sync::Arc;

pub mod config;
pub mod database;
pub mod error;
pub mod middleware;
pub mod realtime;
pub mod router;
pub mod routes;
pub mod utils;

#[cfg(test)]
mod tests;

use database::store::{ConversationDirectory, MessageStore};
use realtime::{DeliveryCoordinator, RoomRouter};

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub messages: Arc<dyn MessageStore>,
    pub conversations: Arc<dyn ConversationDirectory>,
    pub coordinator: Arc<DeliveryCoordinator>,
}

impl AppState {
    /// 存储就绪后构造协调器，路由与处理器只通过状态拿到它
    pub fn new(
        config: Config,
        messages: Arc<dyn MessageStore>,
        conversations: Arc<dyn ConversationDirectory>,
    ) -> Self {
        let coordinator = Arc::new(DeliveryCoordinator::new(
            Arc::new(RoomRouter::new()),
            messages.clone(),
            conversations.clone(),
        ));
        Self {
            config,
            messages,
            conversations,
            coordinator,
        }
    }
}
