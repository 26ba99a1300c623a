pub mod engine;
pub mod handlers;
pub mod types;

use axum::{middleware, routing::get, Router};
use std::sync::Arc;

use crate::core::shared::state::AppState;
use crate::security::auth::require_session;

pub use handlers::*;
pub use types::*;

pub fn configure(state: &Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/dashboards", get(handle_get_dashboard))
        .route("/dashboards/addresses", get(handle_get_addresses))
        .route("/dashboards/created", get(handle_get_created))
        .route("/dashboards/completion", get(handle_get_completion))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_session,
        ))
}
