//! Credit balance and history of the calling account.

use axum::Json;
use axum::extract::{Extension, State};
use axum::response::IntoResponse;

use crate::application::orchestrator::CallerContext;

use super::ledger_to_api;
use crate::infra::http::api::error::ApiError;
use crate::infra::http::api::models::{BalanceResponse, TransactionList};
use crate::infra::http::api::state::ApiState;

pub async fn get_balance(
    State(state): State<ApiState>,
    Extension(ctx): Extension<CallerContext>,
) -> Result<impl IntoResponse, ApiError> {
    let audit = state
        .ledger
        .audit_balance(&ctx.account_id)
        .await
        .map_err(ledger_to_api)?;
    Ok(Json(BalanceResponse::from(audit)))
}

pub async fn list_transactions(
    State(state): State<ApiState>,
    Extension(ctx): Extension<CallerContext>,
) -> Result<impl IntoResponse, ApiError> {
    let transactions = state
        .ledger
        .transactions(&ctx.account_id)
        .await
        .map_err(ledger_to_api)?;
    Ok(Json(TransactionList {
        account_id: ctx.account_id,
        transactions,
    }))
}
