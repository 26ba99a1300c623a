use axum::{
    async_trait,
    extract::{FromRequest, Path, Request, State},
    http::StatusCode,
    Json,
};
use log::info;
use serde_json::{json, Map, Value};
use std::sync::Arc;

use super::query::ListParams;
use crate::core::shared::error::{AppError, FieldError};
use crate::core::shared::state::AppState;
use crate::core::store::documents::{project, validate_document};
use crate::core::store::Collection;
use crate::security::auth::AuthenticatedUser;

/// JSON object body of a create or update.
pub struct DocumentBody(pub Map<String, Value>);

#[async_trait]
impl<S> FromRequest<S> for DocumentBody
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<Value>::from_request(req, state)
            .await
            .map_err(|e| AppError::invalid(FieldError::body("body", e.body_text())))?;
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(AppError::invalid(
                FieldError::body("body", "Expected a JSON object").with_value(other),
            )),
        }
    }
}

fn not_found(collection: Collection, id: &str) -> AppError {
    AppError::NotFound(format!("No {} document with id '{id}'", collection.route()))
}

pub async fn handle_list(
    collection: Collection,
    State(state): State<Arc<AppState>>,
    params: ListParams,
) -> Result<Json<Value>, AppError> {
    let (query, select) = params.resolve(collection, state.config.crud.max_limit)?;
    let page = state.store.list_documents(collection, &query).await?;

    let results: Vec<Value> = page
        .results
        .into_iter()
        .map(|doc| project(doc, &select))
        .collect();
    let mut body = json!({ "results": results });
    if let Some(count) = page.count {
        body["count"] = json!(count);
    }
    Ok(Json(body))
}

pub async fn handle_create(
    collection: Collection,
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    DocumentBody(body): DocumentBody,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let document = validate_document(collection, body, true).map_err(AppError::Validation)?;
    let created = state.store.insert_document(collection, document).await?;
    info!(
        "{} created {} {}",
        user.username,
        collection.route(),
        created["id"].as_str().unwrap_or_default()
    );
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn handle_get(
    collection: Collection,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    state
        .store
        .get_document(collection, &id)
        .await?
        .map(Json)
        .ok_or_else(|| not_found(collection, &id))
}

/// Merges the body into the stored document. `id` and `created_at` are
/// never rewritten.
pub async fn handle_update(
    collection: Collection,
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<String>,
    DocumentBody(mut body): DocumentBody,
) -> Result<Json<Value>, AppError> {
    for server_owned in ["id", "created_at", "updated_at"] {
        body.remove(server_owned);
    }
    let patch = validate_document(collection, body, false).map_err(AppError::Validation)?;

    let updated = state
        .store
        .update_document(collection, &id, patch)
        .await?
        .ok_or_else(|| not_found(collection, &id))?;
    info!("{} updated {} {id}", user.username, collection.route());
    Ok(Json(updated))
}

pub async fn handle_delete(
    collection: Collection,
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let document = state
        .store
        .get_document(collection, &id)
        .await?
        .ok_or_else(|| not_found(collection, &id))?;
    if !state.store.delete_document(collection, &id).await? {
        return Err(not_found(collection, &id));
    }
    info!("{} deleted {} {id}", user.username, collection.route());
    Ok(Json(document))
}
