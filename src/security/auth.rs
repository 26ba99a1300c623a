use axum::{
    async_trait,
    body::Body,
    extract::{FromRequestParts, State},
    http::{header, request::Parts, Request},
    middleware::Next,
    response::Response,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use super::jwt::extract_bearer_token;
use crate::core::shared::error::AppError;
use crate::core::shared::state::AppState;

/// The dashboard user behind a validated bearer token.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuthenticatedUser {
    pub id: Uuid,
    pub username: String,
    pub is_admin: bool,
}

pub async fn require_session(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let header_value = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized("Missing bearer token".into()))?;
    let token = extract_bearer_token(header_value)
        .ok_or_else(|| AppError::Unauthorized("Missing bearer token".into()))?;

    let claims = state.jwt.validate(token).map_err(|e| {
        debug!("Rejected session token: {e}");
        AppError::Unauthorized("Invalid or expired token".into())
    })?;
    let id = claims
        .user_id()
        .map_err(|_| AppError::Unauthorized("Invalid or expired token".into()))?;

    request.extensions_mut().insert(AuthenticatedUser {
        id,
        username: claims.username,
        is_admin: claims.is_admin,
    });
    Ok(next.run(request).await)
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthenticatedUser>()
            .cloned()
            .ok_or_else(|| AppError::Unauthorized("Missing bearer token".into()))
    }
}
