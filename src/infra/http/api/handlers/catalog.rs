//! Registry listings.

use axum::Json;
use axum::extract::{Path, State};
use axum::response::IntoResponse;

use crate::infra::http::api::models::{EngineList, RendererList, RendererView};
use crate::infra::http::api::state::ApiState;

pub async fn list_engines(State(state): State<ApiState>) -> impl IntoResponse {
    Json(EngineList {
        engines: state.orchestrator.registry().list_engines(),
    })
}

pub async fn list_renderers(State(state): State<ApiState>) -> impl IntoResponse {
    let registry = state.orchestrator.registry();
    let renderers = registry
        .list_renderers()
        .into_iter()
        .map(|descriptor| RendererView {
            recommended: registry.is_recommended(&descriptor.id),
            descriptor,
        })
        .collect();
    Json(RendererList { renderers })
}

/// Renderers usable with `engine_id`, best match first. Unknown engines
/// yield an empty list.
pub async fn list_compatible_renderers(
    State(state): State<ApiState>,
    Path(engine_id): Path<String>,
) -> impl IntoResponse {
    let registry = state.orchestrator.registry();
    let renderers = registry
        .find_compatible(&engine_id)
        .into_iter()
        .map(|descriptor| RendererView {
            recommended: registry.is_recommended(&descriptor.id),
            descriptor,
        })
        .collect();
    Json(RendererList { renderers })
}
