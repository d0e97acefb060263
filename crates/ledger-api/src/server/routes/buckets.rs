use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use contracts::{ClientBucket, LedgerTransaction, SCHEMA_VERSION_V1};
use serde::Serialize;

use crate::server::error::HttpApiError;
use crate::server::state::AppState;
use crate::server::util::org_context;
use crate::{
    BucketUtilization, CreateBucketRequest, RecordTransactionRequest, TransactionReceipt,
};

#[derive(Debug, Serialize)]
pub(crate) struct BucketListResponse {
    schema_version: String,
    buckets: Vec<ClientBucket>,
}

#[derive(Debug, Serialize)]
pub(crate) struct TransactionListResponse {
    schema_version: String,
    bucket_id: String,
    transactions: Vec<LedgerTransaction>,
}

pub(crate) async fn create_bucket(
    Path(client_id): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CreateBucketRequest>,
) -> Result<Json<ClientBucket>, HttpApiError> {
    let ctx = org_context(&headers)?;
    let mut inner = state.inner.lock().await;
    inner
        .create_bucket(&ctx, &client_id, request)
        .map(Json)
        .map_err(HttpApiError::from_store)
}

pub(crate) async fn list_client_buckets(
    Path(client_id): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<BucketListResponse>, HttpApiError> {
    let ctx = org_context(&headers)?;
    let inner = state.inner.lock().await;
    let buckets = inner
        .list_buckets_for_client(&ctx, &client_id)
        .map_err(HttpApiError::from_store)?;
    Ok(Json(BucketListResponse {
        schema_version: SCHEMA_VERSION_V1.to_string(),
        buckets,
    }))
}

pub(crate) async fn get_bucket(
    Path(bucket_id): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ClientBucket>, HttpApiError> {
    let ctx = org_context(&headers)?;
    let inner = state.inner.lock().await;
    inner
        .get_bucket(&ctx, &bucket_id)
        .map(Json)
        .map_err(HttpApiError::from_store)
}

pub(crate) async fn close_bucket(
    Path(bucket_id): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ClientBucket>, HttpApiError> {
    let ctx = org_context(&headers)?;
    let mut inner = state.inner.lock().await;
    inner
        .close_bucket(&ctx, &bucket_id)
        .map(Json)
        .map_err(HttpApiError::from_store)
}

pub(crate) async fn bucket_utilization(
    Path(bucket_id): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<BucketUtilization>, HttpApiError> {
    let ctx = org_context(&headers)?;
    let inner = state.inner.lock().await;
    inner
        .bucket_utilization(&ctx, &bucket_id)
        .map(Json)
        .map_err(HttpApiError::from_store)
}

pub(crate) async fn record_transaction(
    Path(bucket_id): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<RecordTransactionRequest>,
) -> Result<Json<TransactionReceipt>, HttpApiError> {
    let ctx = org_context(&headers)?;
    if request.description.trim().is_empty() {
        return Err(HttpApiError::invalid_request(
            "transaction description is required",
            None,
        ));
    }
    let mut inner = state.inner.lock().await;
    inner
        .record_transaction(&ctx, &bucket_id, request)
        .map(Json)
        .map_err(HttpApiError::from_store)
}

pub(crate) async fn list_transactions(
    Path(bucket_id): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<TransactionListResponse>, HttpApiError> {
    let ctx = org_context(&headers)?;
    let inner = state.inner.lock().await;
    let transactions = inner
        .list_transactions(&ctx, &bucket_id)
        .map_err(HttpApiError::from_store)?;
    Ok(Json(TransactionListResponse {
        schema_version: SCHEMA_VERSION_V1.to_string(),
        bucket_id,
        transactions,
    }))
}
