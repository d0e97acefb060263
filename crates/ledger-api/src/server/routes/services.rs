use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use contracts::{ServiceItem, ServiceStatus, SCHEMA_VERSION_V1};
use serde::{Deserialize, Serialize};

use crate::server::error::HttpApiError;
use crate::server::state::AppState;
use crate::server::util::org_context;
use crate::{CreateServiceRequest, UpdateServiceRequest};

#[derive(Debug, Serialize)]
pub(crate) struct ServiceListResponse {
    schema_version: String,
    services: Vec<ServiceItem>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ServiceTransitionRequest {
    status: ServiceStatus,
}

#[derive(Debug, Serialize)]
pub(crate) struct ServiceDeletedResponse {
    schema_version: String,
    service_id: String,
    deleted: bool,
}

pub(crate) async fn create_service(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CreateServiceRequest>,
) -> Result<Json<ServiceItem>, HttpApiError> {
    let ctx = org_context(&headers)?;
    let mut inner = state.inner.lock().await;
    inner
        .create_service(&ctx, request)
        .map(Json)
        .map_err(HttpApiError::from_store)
}

pub(crate) async fn list_services(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ServiceListResponse>, HttpApiError> {
    let ctx = org_context(&headers)?;
    let inner = state.inner.lock().await;
    let services = inner
        .list_services(&ctx)
        .map_err(HttpApiError::from_store)?;
    Ok(Json(ServiceListResponse {
        schema_version: SCHEMA_VERSION_V1.to_string(),
        services,
    }))
}

pub(crate) async fn update_service(
    Path(service_id): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<UpdateServiceRequest>,
) -> Result<Json<ServiceItem>, HttpApiError> {
    let ctx = org_context(&headers)?;
    let mut inner = state.inner.lock().await;
    inner
        .update_service(&ctx, &service_id, request)
        .map(Json)
        .map_err(HttpApiError::from_store)
}

pub(crate) async fn transition_service(
    Path(service_id): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ServiceTransitionRequest>,
) -> Result<Json<ServiceItem>, HttpApiError> {
    let ctx = org_context(&headers)?;
    let mut inner = state.inner.lock().await;
    inner
        .transition_service(&ctx, &service_id, request.status)
        .map(Json)
        .map_err(HttpApiError::from_store)
}

pub(crate) async fn delete_service(
    Path(service_id): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ServiceDeletedResponse>, HttpApiError> {
    let ctx = org_context(&headers)?;
    let mut inner = state.inner.lock().await;
    inner
        .delete_service(&ctx, &service_id)
        .map_err(HttpApiError::from_store)?;
    Ok(Json(ServiceDeletedResponse {
        schema_version: SCHEMA_VERSION_V1.to_string(),
        service_id,
        deleted: true,
    }))
}
