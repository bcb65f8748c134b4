pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod state;

pub use state::ApiState;

use axum::{
    Router, middleware as axum_middleware,
    routing::{delete, get, post},
};

use crate::infra::http::RouterState;
use crate::infra::http::middleware::log_responses;

pub fn build_api_router(state: RouterState) -> Router<RouterState> {
    Router::new()
        .route("/api/v1/engines", get(handlers::list_engines))
        .route(
            "/api/v1/engines/{id}/renderers",
            get(handlers::list_compatible_renderers),
        )
        .route("/api/v1/renderers", get(handlers::list_renderers))
        .route(
            "/api/v1/reports",
            get(handlers::list_reports).post(handlers::submit_report),
        )
        .route("/api/v1/reports/{id}", get(handlers::get_report))
        .route("/api/v1/reports/{id}/cancel", post(handlers::cancel_report))
        .route(
            "/api/v1/reports/{id}/artifact",
            get(handlers::download_artifact),
        )
        .route(
            "/api/v1/reports/{id}/share-links",
            get(handlers::list_share_links).post(handlers::issue_share_link),
        )
        .route(
            "/api/v1/share-links/{id}",
            delete(handlers::revoke_share_link),
        )
        .route("/api/v1/balance", get(handlers::get_balance))
        .route("/api/v1/transactions", get(handlers::list_transactions))
        .with_state(state)
        .layer(axum_middleware::from_fn(middleware::caller_identity))
        .layer(axum_middleware::from_fn(log_responses))
}
