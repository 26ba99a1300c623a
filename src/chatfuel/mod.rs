//! Webhook endpoints called by the chat platform.

pub mod certificate;
pub mod handlers;
pub mod payload;
pub mod sanitize;

use axum::{middleware, routing::post, Router};
use std::sync::Arc;

use crate::core::shared::state::AppState;
use crate::security::webhook::require_webhook_key;

pub fn configure(state: &Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/chatfuel/people", post(handlers::upsert_person))
        .route("/chatfuel/reply", post(handlers::upsert_reply))
        .route("/chatfuel/comment", post(handlers::upsert_comment))
        .route("/chatfuel/certificate", post(certificate::generate_certificate))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_webhook_key,
        ))
}
