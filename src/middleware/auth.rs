use crate::{auth::verify_jwt, error::AppError, state::AppState};
use axum::{
    async_trait,
    body::Body,
    extract::{FromRequestParts, State},
    http::{request::Parts, Request},
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

/// Authenticated caller, scoped to one tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub tenant_id: Uuid,
}

pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let token = bearer_token(&req)
        .or_else(|| query_token(&req))
        .ok_or_else(|| AppError::Unauthorized("Invalid credentials".to_string()))?;

    let claims = verify_jwt(&token, &state.config.jwt_secret)?;
    let user = AuthUser {
        user_id: claims.user_id()?,
        tenant_id: claims.tenant_id,
    };

    req.extensions_mut().insert(user);

    Ok(next.run(req).await)
}

fn bearer_token(req: &Request<Body>) -> Option<String> {
    req.headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::to_string)
}

// Browsers cannot set headers on WebSocket upgrades
fn query_token(req: &Request<Body>) -> Option<String> {
    req.uri().query()?.split('&').find_map(|pair| {
        pair.strip_prefix("access_token=")
            .filter(|token| !token.is_empty())
            .map(str::to_string)
    })
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthUser>()
            .copied()
            .ok_or_else(|| AppError::Unauthorized("Invalid credentials".to_string()))
    }
}
