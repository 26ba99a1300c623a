//! List/create/read/update/delete routes for every document collection.

pub mod handlers;
pub mod query;

use axum::{extract::{Path, State}, middleware, routing::get, Router};
use std::sync::Arc;

use crate::core::shared::state::AppState;
use crate::core::store::Collection;
use crate::security::auth::{require_session, AuthenticatedUser};
use handlers::*;
use query::ListParams;

type AppStateRef = State<Arc<AppState>>;

fn collection_routes(collection: Collection) -> Router<Arc<AppState>> {
    let base = format!("/{}", collection.route());
    Router::new()
        .route(
            &base,
            get(move |state: AppStateRef, params: ListParams| {
                handle_list(collection, state, params)
            })
            .post(
                move |state: AppStateRef, user: AuthenticatedUser, body: DocumentBody| {
                    handle_create(collection, state, user, body)
                },
            ),
        )
        .route(
            &format!("{base}/:id"),
            get(move |state: AppStateRef, id: Path<String>| handle_get(collection, state, id))
                .put(
                    move |state: AppStateRef,
                          user: AuthenticatedUser,
                          id: Path<String>,
                          body: DocumentBody| {
                        handle_update(collection, state, user, id, body)
                    },
                )
                .delete(
                    move |state: AppStateRef, user: AuthenticatedUser, id: Path<String>| {
                        handle_delete(collection, state, user, id)
                    },
                ),
        )
}

pub fn configure(state: &Arc<AppState>) -> Router<Arc<AppState>> {
    Collection::ROUTABLE
        .into_iter()
        .fold(Router::new(), |router, collection| {
            router.merge(collection_routes(collection))
        })
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_session,
        ))
}
