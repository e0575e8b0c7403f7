//! Character listing endpoint.

use axum::{
    extract::{rejection::QueryRejection, Query, State},
    routing::get,
    Json, Router,
};
use serde::Deserialize;

use crate::error::{ApiError, ApiResult};
use crate::services::RecordPage;
use crate::state::AppState;

fn default_sort() -> String {
    "id".to_string()
}

fn default_order() -> String {
    "asc".to_string()
}

fn default_page() -> u32 {
    1
}

fn default_page_size() -> u32 {
    20
}

/// Query string for `GET /characters`. Range and enum checks happen in
/// `PageQuery::parse`; this only handles presence and numeric shape.
#[derive(Debug, Clone, Deserialize)]
pub struct ListCharactersParams {
    #[serde(default = "default_sort")]
    pub sort: String,
    #[serde(default = "default_order")]
    pub order: String,
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

/// GET /characters
pub async fn list_characters(
    State(state): State<AppState>,
    params: Result<Query<ListCharactersParams>, QueryRejection>,
) -> ApiResult<Json<RecordPage>> {
    let Query(params) = params.map_err(|rejection| ApiError::invalid_query(rejection.body_text()))?;

    let page = state
        .records
        .list_records(&params.sort, &params.order, params.page, params.page_size)
        .await?;
    Ok(Json(page))
}

pub fn create_router() -> Router<AppState> {
    Router::new().route("/characters", get(list_characters))
}
