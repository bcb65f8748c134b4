//! Share link management for the owner of a report.

use axum::Json;
use axum::extract::{Extension, Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use uuid::Uuid;

use crate::application::orchestrator::CallerContext;
use crate::application::share_links::IssueShareLinkCommand;

use super::share_link_to_api;
use crate::infra::http::api::error::ApiError;
use crate::infra::http::api::models::{
    IssueShareLinkRequest, ShareLinkIssuedResponse, ShareLinkList, ShareLinkView,
};
use crate::infra::http::api::state::ApiState;

pub async fn issue_share_link(
    State(state): State<ApiState>,
    Extension(ctx): Extension<CallerContext>,
    Path(job_id): Path<Uuid>,
    Json(payload): Json<IssueShareLinkRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let issued = state
        .share_links
        .issue(
            &ctx,
            IssueShareLinkCommand {
                job_id,
                subject_binding: payload.subject_binding,
                expiry_days: payload.expiry_days,
                max_access_count: payload.max_access_count,
            },
        )
        .await
        .map_err(share_link_to_api)?;

    let remaining_accesses = issued.record.remaining_accesses();
    Ok((
        StatusCode::CREATED,
        Json(ShareLinkIssuedResponse {
            link: issued.record,
            token: issued.token,
            remaining_accesses,
        }),
    ))
}

pub async fn list_share_links(
    State(state): State<ApiState>,
    Extension(ctx): Extension<CallerContext>,
    Path(job_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let links = state
        .share_links
        .list_for_job(&ctx, job_id)
        .await
        .map_err(share_link_to_api)?;
    Ok(Json(ShareLinkList {
        job_id,
        links: links.into_iter().map(ShareLinkView::from).collect(),
    }))
}

pub async fn revoke_share_link(
    State(state): State<ApiState>,
    Extension(ctx): Extension<CallerContext>,
    Path(link_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let link = state
        .share_links
        .revoke(&ctx, link_id)
        .await
        .map_err(share_link_to_api)?;
    Ok(Json(ShareLinkView::from(link)))
}
