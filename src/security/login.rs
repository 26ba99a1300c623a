use axum::{extract::State, routing::post, Json, Router};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};

use super::jwt::IssuedToken;
use super::password::verify_password;
use crate::core::shared::error::{AppError, FieldError};
use crate::core::shared::state::AppState;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

pub fn configure() -> Router<Arc<AppState>> {
    Router::new().route("/auth/login", post(login))
}

pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<IssuedToken>, AppError> {
    let mut errors = Vec::new();
    if payload.username.trim().is_empty() {
        errors.push(FieldError::body("username", "Field is required"));
    }
    if payload.password.is_empty() {
        errors.push(FieldError::body("password", "Field is required"));
    }
    if !errors.is_empty() {
        return Err(AppError::Validation(errors));
    }

    let rejected = || AppError::Unauthorized("Invalid username or password".into());
    let user = state
        .store
        .find_user(payload.username.trim())
        .await?
        .ok_or_else(rejected)?;

    let hash = user.password_hash.clone();
    let password = payload.password;
    let verified = tokio::task::spawn_blocking(move || verify_password(&password, &hash))
        .await
        .map_err(|e| AppError::Internal(e.into()))??;
    if !verified {
        warn!("Failed login for {}", user.username);
        return Err(rejected());
    }

    let issued = state.jwt.issue(&user)?;
    info!("User {} logged in", user.username);
    Ok(Json(issued))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::shared::test_utils::{admin_token, body_json, json_request, test_state};
    use axum::http::{Method, StatusCode};
    use serde_json::json;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_login_issues_token() {
        let state = test_state();
        admin_token(&state).await;
        let app = configure().with_state(state.clone());

        let response = app
            .oneshot(json_request(
                Method::POST,
                "/auth/login",
                json!({"username": "admin", "password": "admin-password"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        let claims = state.jwt.validate(body["token"].as_str().unwrap()).unwrap();
        assert_eq!(claims.username, "admin");
        assert!(body["expires_at"].is_string());
    }

    #[tokio::test]
    async fn test_login_rejects_wrong_password() {
        let state = test_state();
        admin_token(&state).await;
        let app = configure().with_state(state);

        let response = app
            .oneshot(json_request(
                Method::POST,
                "/auth/login",
                json!({"username": "admin", "password": "nope"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_login_requires_fields() {
        let app = configure().with_state(test_state());
        let response = app
            .oneshot(json_request(Method::POST, "/auth/login", json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["errors"].as_array().unwrap().len(), 2);
    }
}
