use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use contracts::{AgreementStatus, AgreementTotals, ServiceAgreement, SCHEMA_VERSION_V1};
use serde::{Deserialize, Serialize};

use crate::server::error::HttpApiError;
use crate::server::state::AppState;
use crate::server::util::org_context;
use crate::{AgreementSaveReport, CreateAgreementRequest, SaveAgreementRequest};

#[derive(Debug, Serialize)]
pub(crate) struct AgreementListResponse {
    schema_version: String,
    agreements: Vec<ServiceAgreement>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AgreementTransitionRequest {
    status: AgreementStatus,
}

pub(crate) async fn create_agreement(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CreateAgreementRequest>,
) -> Result<Json<ServiceAgreement>, HttpApiError> {
    let ctx = org_context(&headers)?;
    let mut inner = state.inner.lock().await;
    inner
        .create_agreement(&ctx, request)
        .map(Json)
        .map_err(HttpApiError::from_store)
}

pub(crate) async fn get_agreement(
    Path(agreement_id): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ServiceAgreement>, HttpApiError> {
    let ctx = org_context(&headers)?;
    let inner = state.inner.lock().await;
    inner
        .get_agreement(&ctx, &agreement_id)
        .map(Json)
        .map_err(HttpApiError::from_store)
}

pub(crate) async fn list_client_agreements(
    Path(client_id): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<AgreementListResponse>, HttpApiError> {
    let ctx = org_context(&headers)?;
    let inner = state.inner.lock().await;
    let agreements = inner
        .list_agreements_for_client(&ctx, &client_id)
        .map_err(HttpApiError::from_store)?;
    Ok(Json(AgreementListResponse {
        schema_version: SCHEMA_VERSION_V1.to_string(),
        agreements,
    }))
}

/// Two-step save: the response reports whether the optional extended fields
/// landed; a failed second step still returns 200 with the committed core.
pub(crate) async fn save_agreement(
    Path(agreement_id): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<SaveAgreementRequest>,
) -> Result<Json<AgreementSaveReport>, HttpApiError> {
    let ctx = org_context(&headers)?;
    let mut inner = state.inner.lock().await;
    inner
        .save_agreement(&ctx, &agreement_id, request)
        .map(Json)
        .map_err(HttpApiError::from_store)
}

pub(crate) async fn transition_agreement(
    Path(agreement_id): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<AgreementTransitionRequest>,
) -> Result<Json<ServiceAgreement>, HttpApiError> {
    let ctx = org_context(&headers)?;
    let mut inner = state.inner.lock().await;
    inner
        .transition_agreement(&ctx, &agreement_id, request.status)
        .map(Json)
        .map_err(HttpApiError::from_store)
}

pub(crate) async fn agreement_totals(
    Path(agreement_id): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<AgreementTotals>, HttpApiError> {
    let ctx = org_context(&headers)?;
    let inner = state.inner.lock().await;
    inner
        .agreement_totals(&ctx, &agreement_id)
        .map(Json)
        .map_err(HttpApiError::from_store)
}
