pub mod api;
mod middleware;
mod share;

pub use api::{ApiState, build_api_router};

use std::sync::Arc;

use crate::application::error::ErrorReport;
use crate::application::share_links::ShareLinkService;
use crate::infra::db::PostgresRepositories;
use axum::extract::{FromRef, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Router, middleware as axum_middleware};
use sqlx::Error as SqlxError;

/// State shared by every route of the service.
#[derive(Clone)]
pub struct RouterState {
    pub api: ApiState,
    pub db: Option<Arc<PostgresRepositories>>,
}

impl FromRef<RouterState> for ApiState {
    fn from_ref(state: &RouterState) -> Self {
        state.api.clone()
    }
}

impl FromRef<RouterState> for Arc<ShareLinkService> {
    fn from_ref(state: &RouterState) -> Self {
        state.api.share_links.clone()
    }
}

pub fn build_router(state: RouterState) -> Router {
    let public = Router::new()
        .route("/share/{token}", get(share::resolve_share_link))
        .route("/_health/db", get(db_health))
        .layer(axum_middleware::from_fn(middleware::log_responses));

    public
        .merge(build_api_router(state.clone()))
        .with_state(state)
        .layer(axum_middleware::from_fn(middleware::set_request_context))
}

async fn db_health(State(state): State<RouterState>) -> Response {
    match state.db {
        Some(db) => db_health_response(db.health_check().await),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

fn db_health_response(result: Result<(), SqlxError>) -> Response {
    match result {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => {
            let mut response = StatusCode::SERVICE_UNAVAILABLE.into_response();
            ErrorReport::from_error(
                "infra::http::db_health",
                StatusCode::SERVICE_UNAVAILABLE,
                &err,
            )
            .attach(&mut response);
            response
        }
    }
}
