use axum::{
    Router,
    routing::{get, post, put},
};

use crate::{
    AppState,
    middleware::{auth_middleware, log_errors},
    realtime::socket::websocket_handler,
    routes,
};

// 会话相关的路由
fn conversation_routes() -> Router<AppState> {
    Router::new()
        .route("/conversations/direct", post(routes::conversation::open_direct_conversation))
        .route("/conversations/group", post(routes::conversation::create_group_conversation))
        .route("/conversations/{id}", get(routes::conversation::list_user_conversations))
        .route("/conversations/full/{id}", get(routes::conversation::get_full_conversation))
        .route("/conversations/group/{id}", get(routes::conversation::get_group_conversation))
        .route(
            "/conversations/{id}/participants",
            post(routes::conversation::add_participant),
        )
}

// 消息相关的路由
fn message_routes() -> Router<AppState> {
    Router::new()
        .route("/messages", post(routes::message::create_message))
        .route(
            "/messages/{id}",
            get(routes::message::list_messages).delete(routes::message::delete_message),
        )
        .route(
            "/messages/{id}/{message_id}/status",
            put(routes::message::update_status),
        )
}

/// 创建主路由：WebSocket 在握手时自行校验令牌，其余接口统一走认证中间件
pub fn create_router(state: AppState) -> Router {
    let public_routes = Router::new().route("/ws", get(websocket_handler));

    let protected_routes = Router::new()
        .merge(conversation_routes())
        .merge(message_routes())
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    let api = Router::new().merge(public_routes).merge(protected_routes);
    let base = state.config.api_base_uri.trim_end_matches('/');
    let router = if base.is_empty() {
        api
    } else {
        Router::new().nest(base, api)
    };

    router
        .layer(axum::middleware::from_fn(log_errors))
        .with_state(state)
}
