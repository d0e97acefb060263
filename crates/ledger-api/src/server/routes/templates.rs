use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use contracts::{BucketTemplate, SCHEMA_VERSION_V1};
use serde::Serialize;

use crate::server::error::HttpApiError;
use crate::server::state::AppState;
use crate::server::util::org_context;
use crate::CreateTemplateRequest;

#[derive(Debug, Serialize)]
pub(crate) struct TemplateListResponse {
    schema_version: String,
    templates: Vec<BucketTemplate>,
}

#[derive(Debug, Serialize)]
pub(crate) struct TemplateDeletedResponse {
    schema_version: String,
    template_id: String,
    deleted: bool,
}

pub(crate) async fn create_template(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CreateTemplateRequest>,
) -> Result<Json<BucketTemplate>, HttpApiError> {
    let ctx = org_context(&headers)?;
    let mut inner = state.inner.lock().await;
    inner
        .create_template(&ctx, request)
        .map(Json)
        .map_err(HttpApiError::from_store)
}

pub(crate) async fn list_templates(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<TemplateListResponse>, HttpApiError> {
    let ctx = org_context(&headers)?;
    let inner = state.inner.lock().await;
    let templates = inner
        .list_templates(&ctx)
        .map_err(HttpApiError::from_store)?;
    Ok(Json(TemplateListResponse {
        schema_version: SCHEMA_VERSION_V1.to_string(),
        templates,
    }))
}

pub(crate) async fn toggle_characteristic(
    Path((template_id, index)): Path<(String, usize)>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<BucketTemplate>, HttpApiError> {
    let ctx = org_context(&headers)?;
    let mut inner = state.inner.lock().await;
    inner
        .toggle_characteristic(&ctx, &template_id, index)
        .map(Json)
        .map_err(HttpApiError::from_store)
}

pub(crate) async fn delete_template(
    Path(template_id): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<TemplateDeletedResponse>, HttpApiError> {
    let ctx = org_context(&headers)?;
    let mut inner = state.inner.lock().await;
    inner
        .delete_template(&ctx, &template_id)
        .map_err(HttpApiError::from_store)?;
    Ok(Json(TemplateDeletedResponse {
        schema_version: SCHEMA_VERSION_V1.to_string(),
        template_id,
        deleted: true,
    }))
}
