use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::core::store::StoreError;

static EXPOSE_ERROR_DETAILS: AtomicBool = AtomicBool::new(false);

/// Include error source chains in 500 responses. Set once at startup,
/// never in production.
pub fn set_expose_error_details(expose: bool) {
    EXPOSE_ERROR_DETAILS.store(expose, Ordering::Relaxed);
}

fn expose_error_details() -> bool {
    EXPOSE_ERROR_DETAILS.load(Ordering::Relaxed)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldError {
    pub location: &'static str,
    pub param: String,
    pub msg: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl FieldError {
    pub fn body(param: &str, msg: impl Into<String>) -> Self {
        Self {
            location: "body",
            param: param.to_string(),
            msg: msg.into(),
            value: None,
        }
    }

    pub fn query(param: &str, msg: impl Into<String>) -> Self {
        Self {
            location: "query",
            param: param.to_string(),
            msg: msg.into(),
            value: None,
        }
    }

    pub fn with_value(mut self, value: Value) -> Self {
        self.value = Some(value);
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Validation failed: {} error(s)", .0.len())]
    Validation(Vec<FieldError>),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error("Forbidden: {0}")]
    Forbidden(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn invalid(error: FieldError) -> Self {
        Self::Validation(vec![error])
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Store(StoreError::Constraint(_)) => StatusCode::BAD_REQUEST,
            Self::Store(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

fn source_chain(error: &(dyn std::error::Error + 'static)) -> Vec<String> {
    let mut chain = vec![error.to_string()];
    let mut current = error.source();
    while let Some(source) = current {
        chain.push(source.to_string());
        current = source.source();
    }
    chain
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        match self {
            Self::Validation(errors) => (status, Json(json!({ "errors": errors }))).into_response(),
            Self::Store(StoreError::Constraint(message)) => {
                let errors = vec![FieldError::body("document", message)];
                (status, Json(json!({ "errors": errors }))).into_response()
            }
            Self::NotFound(message) | Self::Forbidden(message) => {
                (status, Json(json!({ "message": message }))).into_response()
            }
            Self::Unauthorized(message) => (
                status,
                [(header::WWW_AUTHENTICATE, "Bearer")],
                Json(json!({ "message": message })),
            )
                .into_response(),
            Self::Store(ref err) => internal_response(err),
            Self::Internal(ref err) => internal_response(&**err),
        }
    }
}

fn internal_response(error: &(dyn std::error::Error + 'static)) -> Response {
    let chain = source_chain(error);
    log::error!("Internal error: {}", chain.join(": "));

    let mut body = json!({ "message": "Internal server error" });
    if expose_error_details() {
        body["stack"] = json!(chain);
    }
    (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    async fn body_json(response: Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_validation_error_lists_every_field() {
        let error = AppError::Validation(vec![
            FieldError::body("personId", "Person not found").with_value(json!("42")),
            FieldError::body("blockId", "Field is required"),
        ]);
        let response = error.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = body_json(response).await;
        let errors = body["errors"].as_array().unwrap();
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0]["location"], "body");
        assert_eq!(errors[0]["param"], "personId");
        assert_eq!(errors[0]["value"], "42");
        assert!(errors[1].get("value").is_none());
    }

    #[tokio::test]
    async fn test_constraint_violation_is_a_client_error() {
        let error = AppError::from(StoreError::Constraint("duplicate key".into()));
        assert_eq!(error.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_internal_error_hides_chain_unless_exposed() {
        set_expose_error_details(false);
        let response = AppError::from(anyhow::anyhow!("pool exhausted")).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body["message"], "Internal server error");
        assert!(body.get("stack").is_none());
    }

    #[test]
    fn test_unauthorized_sets_challenge_header() {
        let response = AppError::Unauthorized("missing token".into()).into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.headers()[header::WWW_AUTHENTICATE], "Bearer");
    }
}
