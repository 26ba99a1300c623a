use async_trait::async_trait;
use axum::{
    body::Body,
    extract::{Query, State},
    http::Request,
    middleware::Next,
    response::Response,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::warn;

use crate::core::shared::error::AppError;
use crate::core::shared::state::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum WebhookAuthError {
    #[error("Missing webhook key")]
    MissingKey,
    #[error("Invalid webhook key")]
    InvalidKey,
}

impl From<WebhookAuthError> for AppError {
    fn from(err: WebhookAuthError) -> Self {
        match err {
            WebhookAuthError::MissingKey => AppError::Unauthorized(err.to_string()),
            WebhookAuthError::InvalidKey => AppError::Forbidden(err.to_string()),
        }
    }
}

/// Decides whether an inbound chat-platform call may proceed.
#[async_trait]
pub trait WebhookAuthenticator: Send + Sync {
    async fn authenticate(&self, presented: Option<&str>) -> Result<(), WebhookAuthError>;
}

/// One shared key for the single trusted platform integration.
pub struct StaticKeyAuthenticator {
    key: String,
}

impl StaticKeyAuthenticator {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

#[async_trait]
impl WebhookAuthenticator for StaticKeyAuthenticator {
    async fn authenticate(&self, presented: Option<&str>) -> Result<(), WebhookAuthError> {
        let presented = presented
            .filter(|k| !k.is_empty())
            .ok_or(WebhookAuthError::MissingKey)?;
        // An unset key never matches, not even an empty one.
        if self.key.is_empty() || !constant_time_compare(presented, &self.key) {
            return Err(WebhookAuthError::InvalidKey);
        }
        Ok(())
    }
}

fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes()
        .zip(b.bytes())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

#[derive(Debug, Default, Deserialize)]
struct KeyQuery {
    key: Option<String>,
}

/// Gate for the chat-platform routes: reads `?key=` and asks the configured
/// authenticator.
pub async fn require_webhook_key(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let key = Query::<KeyQuery>::try_from_uri(request.uri())
        .map(|Query(q)| q.key)
        .unwrap_or_default();

    if let Err(err) = state.webhook_auth.authenticate(key.as_deref()).await {
        warn!("Rejected webhook call to {}: {err}", request.uri().path());
        return Err(err.into());
    }
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_key() {
        let auth = StaticKeyAuthenticator::new("s3cret");
        assert_eq!(auth.authenticate(Some("s3cret")).await, Ok(()));
        assert_eq!(
            auth.authenticate(Some("s3cre")).await,
            Err(WebhookAuthError::InvalidKey)
        );
        assert_eq!(
            auth.authenticate(None).await,
            Err(WebhookAuthError::MissingKey)
        );
        assert_eq!(
            auth.authenticate(Some("")).await,
            Err(WebhookAuthError::MissingKey)
        );
    }

    #[tokio::test]
    async fn test_unconfigured_key_rejects_everything() {
        let auth = StaticKeyAuthenticator::new("");
        assert_eq!(
            auth.authenticate(Some("anything")).await,
            Err(WebhookAuthError::InvalidKey)
        );
    }

    #[test]
    fn test_constant_time_compare() {
        assert!(constant_time_compare("abc", "abc"));
        assert!(!constant_time_compare("abc", "abd"));
        assert!(!constant_time_compare("abc", "abcd"));
    }
}
