use axum::{extract::State, Json};
use std::sync::Arc;

use super::engine;
use super::types::{AddressRow, CompletionRow, DashboardReport, ReportParams};
use crate::core::shared::error::AppError;
use crate::core::shared::state::AppState;
use crate::core::store::CreationBucket;

pub async fn handle_get_dashboard(
    State(state): State<Arc<AppState>>,
    params: ReportParams,
) -> Result<Json<DashboardReport>, AppError> {
    let store = state.store.as_ref();
    let (totals, addresses, created, completion) = tokio::try_join!(
        engine::totals(store),
        engine::address_breakdown(store),
        engine::creation_histogram(store, &params),
        engine::schedule_completion(store, params.range),
    )?;
    Ok(Json(DashboardReport {
        totals,
        addresses,
        created,
        completion,
    }))
}

pub async fn handle_get_addresses(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<AddressRow>>, AppError> {
    Ok(Json(engine::address_breakdown(state.store.as_ref()).await?))
}

pub async fn handle_get_created(
    State(state): State<Arc<AppState>>,
    params: ReportParams,
) -> Result<Json<Vec<CreationBucket>>, AppError> {
    Ok(Json(
        engine::creation_histogram(state.store.as_ref(), &params).await?,
    ))
}

pub async fn handle_get_completion(
    State(state): State<Arc<AppState>>,
    params: ReportParams,
) -> Result<Json<Vec<CompletionRow>>, AppError> {
    Ok(Json(
        engine::schedule_completion(state.store.as_ref(), params.range).await?,
    ))
}
