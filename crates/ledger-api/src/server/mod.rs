//! Axum HTTP surface for the provider API. Every request is tenant-scoped
//! through the `x-org-id` header; handlers build an [`contracts::OrgContext`]
//! from it and thread it into the facade.

mod error;
mod routes;
mod state;
mod util;

use std::net::SocketAddr;
use std::path::PathBuf;

use axum::routing::{delete, get, post, put};
use axum::Router;
use tokio::net::TcpListener;

use crate::ProviderApi;

pub use error::ServerError;
use state::AppState;

pub async fn serve(addr: SocketAddr, sqlite_path: PathBuf) -> Result<(), ServerError> {
    let api = ProviderApi::open(&sqlite_path).map_err(ServerError::Store)?;
    let state = AppState::new(api);
    let app = router(state);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/api/v1/clients",
            post(routes::clients::create_client).get(routes::clients::list_clients),
        )
        .route("/api/v1/clients/{client_id}", get(routes::clients::get_client))
        .route(
            "/api/v1/clients/{client_id}/status",
            post(routes::clients::transition_client),
        )
        .route(
            "/api/v1/clients/{client_id}/buckets",
            post(routes::buckets::create_bucket).get(routes::buckets::list_client_buckets),
        )
        .route(
            "/api/v1/clients/{client_id}/agreements",
            get(routes::agreements::list_client_agreements),
        )
        .route(
            "/api/v1/templates",
            post(routes::templates::create_template).get(routes::templates::list_templates),
        )
        .route(
            "/api/v1/templates/{template_id}",
            delete(routes::templates::delete_template),
        )
        .route(
            "/api/v1/templates/{template_id}/characteristics/{index}/toggle",
            post(routes::templates::toggle_characteristic),
        )
        .route("/api/v1/buckets/{bucket_id}", get(routes::buckets::get_bucket))
        .route(
            "/api/v1/buckets/{bucket_id}/close",
            post(routes::buckets::close_bucket),
        )
        .route(
            "/api/v1/buckets/{bucket_id}/utilization",
            get(routes::buckets::bucket_utilization),
        )
        .route(
            "/api/v1/buckets/{bucket_id}/transactions",
            post(routes::buckets::record_transaction).get(routes::buckets::list_transactions),
        )
        .route(
            "/api/v1/agreements",
            post(routes::agreements::create_agreement),
        )
        .route(
            "/api/v1/agreements/{agreement_id}",
            get(routes::agreements::get_agreement).put(routes::agreements::save_agreement),
        )
        .route(
            "/api/v1/agreements/{agreement_id}/status",
            post(routes::agreements::transition_agreement),
        )
        .route(
            "/api/v1/agreements/{agreement_id}/totals",
            get(routes::agreements::agreement_totals),
        )
        .route(
            "/api/v1/services",
            post(routes::services::create_service).get(routes::services::list_services),
        )
        .route(
            "/api/v1/services/{service_id}",
            put(routes::services::update_service).delete(routes::services::delete_service),
        )
        .route(
            "/api/v1/services/{service_id}/status",
            post(routes::services::transition_service),
        )
        .with_state(state)
}
