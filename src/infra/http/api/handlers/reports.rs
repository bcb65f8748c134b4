//! Report job handlers

use axum::Json;
use axum::extract::{Extension, Path, Query, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use uuid::Uuid;

use crate::application::orchestrator::{CallerContext, SubmitReportCommand};

use super::{list_limit, orchestrator_to_api};
use crate::infra::http::api::error::ApiError;
use crate::infra::http::api::models::{ListQuery, ReportJobList, SubmitReportRequest};
use crate::infra::http::api::state::ApiState;

pub async fn submit_report(
    State(state): State<ApiState>,
    Extension(ctx): Extension<CallerContext>,
    Json(payload): Json<SubmitReportRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let job = state
        .orchestrator
        .submit(
            &ctx,
            SubmitReportCommand {
                session_id: payload.session_id,
                engine_id: payload.engine_id,
                renderer_id: payload.renderer_id,
            },
        )
        .await
        .map_err(orchestrator_to_api)?;

    Ok((StatusCode::ACCEPTED, Json(job)))
}

pub async fn list_reports(
    State(state): State<ApiState>,
    Extension(ctx): Extension<CallerContext>,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let jobs = state
        .orchestrator
        .list_jobs(&ctx, list_limit(query.limit))
        .await
        .map_err(orchestrator_to_api)?;
    Ok(Json(ReportJobList { jobs }))
}

pub async fn get_report(
    State(state): State<ApiState>,
    Extension(ctx): Extension<CallerContext>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let job = state
        .orchestrator
        .get_job(&ctx, id)
        .await
        .map_err(orchestrator_to_api)?;
    Ok(Json(job))
}

pub async fn cancel_report(
    State(state): State<ApiState>,
    Extension(ctx): Extension<CallerContext>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let job = state
        .orchestrator
        .cancel(&ctx, id)
        .await
        .map_err(orchestrator_to_api)?;
    Ok(Json(job))
}

pub async fn download_artifact(
    State(state): State<ApiState>,
    Extension(ctx): Extension<CallerContext>,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let artifact = state
        .orchestrator
        .get_artifact(&ctx, id)
        .await
        .map_err(orchestrator_to_api)?;
    Ok(artifact_response(&artifact.content_type, artifact.body))
}

pub(crate) fn artifact_response(content_type: &str, body: Vec<u8>) -> Response {
    let mut response = body.into_response();
    let value = HeaderValue::from_str(content_type)
        .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"));
    response.headers_mut().insert(header::CONTENT_TYPE, value);
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}
