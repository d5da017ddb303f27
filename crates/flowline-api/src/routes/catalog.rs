//! `POST /catalog/resource` — the one catalog endpoint the worker/broker
//! actually calls (§6); the rest of the catalog's CRUD surface is the
//! out-of-scope admin API (§1).

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use flowline_contracts::{CatalogResourceRequest, CatalogResourceResponse};

use crate::error::ApiError;
use crate::state::AppState;

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/catalog/resource", post(fetch_resource))
        .with_state(state)
}

#[utoipa::path(
    post,
    path = "/catalog/resource",
    request_body = CatalogResourceRequest,
    responses(
        (status = 200, description = "Playbook content", body = CatalogResourceResponse),
        (status = 404, description = "No such playbook/version")
    ),
    tag = "catalog"
)]
pub async fn fetch_resource(
    State(state): State<AppState>,
    Json(req): Json<CatalogResourceRequest>,
) -> Result<Json<CatalogResourceResponse>, ApiError> {
    let (content, playbook) = state
        .catalog
        .fetch_entry(&req.path, req.version.as_deref())
        .await?
        .ok_or(ApiError::NotFound)?;

    Ok(Json(CatalogResourceResponse {
        path: req.path,
        version: playbook.version.unwrap_or_default(),
        content,
    }))
}
