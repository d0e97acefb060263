use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use contracts::{Client, ClientStatus, SCHEMA_VERSION_V1};
use serde::{Deserialize, Serialize};

use crate::server::error::HttpApiError;
use crate::server::state::AppState;
use crate::server::util::org_context;
use crate::CreateClientRequest;

#[derive(Debug, Serialize)]
pub(crate) struct ClientListResponse {
    schema_version: String,
    clients: Vec<Client>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ClientTransitionRequest {
    status: ClientStatus,
}

pub(crate) async fn create_client(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CreateClientRequest>,
) -> Result<Json<Client>, HttpApiError> {
    let ctx = org_context(&headers)?;
    let mut inner = state.inner.lock().await;
    inner
        .create_client(&ctx, request)
        .map(Json)
        .map_err(HttpApiError::from_store)
}

pub(crate) async fn list_clients(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ClientListResponse>, HttpApiError> {
    let ctx = org_context(&headers)?;
    let inner = state.inner.lock().await;
    let clients = inner
        .list_clients(&ctx)
        .map_err(HttpApiError::from_store)?;
    Ok(Json(ClientListResponse {
        schema_version: SCHEMA_VERSION_V1.to_string(),
        clients,
    }))
}

pub(crate) async fn get_client(
    Path(client_id): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Client>, HttpApiError> {
    let ctx = org_context(&headers)?;
    let inner = state.inner.lock().await;
    inner
        .get_client(&ctx, &client_id)
        .map(Json)
        .map_err(HttpApiError::from_store)
}

pub(crate) async fn transition_client(
    Path(client_id): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ClientTransitionRequest>,
) -> Result<Json<Client>, HttpApiError> {
    let ctx = org_context(&headers)?;
    let mut inner = state.inner.lock().await;
    inner
        .transition_client(&ctx, &client_id, request.status)
        .map(Json)
        .map_err(HttpApiError::from_store)
}
