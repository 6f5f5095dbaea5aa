use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::Response,
};
use axum_extra::{
    TypedHeader,
    headers::{Authorization, authorization::Bearer},
};

use crate::AppState;
use crate::error::ChatError;
use crate::utils::verify_token;

/// 校验 Bearer 令牌，并把 Claims 放进请求扩展供处理器使用
pub async fn auth_middleware(
    State(state): State<AppState>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, ChatError> {
    let Some(TypedHeader(Authorization(bearer))) = bearer else {
        tracing::debug!("Missing bearer token for {}", req.uri().path());
        return Err(ChatError::Unauthorized);
    };

    let claims = verify_token(bearer.token(), &state.config).map_err(|e| {
        tracing::warn!("Token verification failed: {}", e);
        ChatError::Unauthorized
    })?;

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}
