//! API handlers organized by resource type.
//!
//! Error conversion helpers shared by the resource modules live here.

mod catalog;
mod ledger;
mod reports;
mod share_links;

pub use catalog::*;
pub use ledger::*;
pub use reports::*;
pub use share_links::*;

use axum::http::StatusCode;

use crate::application::ledger::LedgerError;
use crate::application::orchestrator::OrchestratorError;
use crate::application::repos::RepoError;
use crate::application::share_links::ShareLinkError;
use crate::domain::entities::AccessDenial;
use crate::domain::error::DomainError;

use super::error::{ApiError, codes};

const DEFAULT_LIST_LIMIT: u32 = 50;
const MAX_LIST_LIMIT: u32 = 200;

fn list_limit(limit: Option<u32>) -> u32 {
    limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT)
}

pub(crate) fn repo_to_api(err: RepoError) -> ApiError {
    match err {
        RepoError::Duplicate { constraint } => ApiError::new(
            StatusCode::CONFLICT,
            codes::DUPLICATE,
            "duplicate record",
            Some(constraint),
        ),
        RepoError::NotFound => ApiError::not_found("resource not found"),
        RepoError::InvalidInput { message } => ApiError::new(
            StatusCode::BAD_REQUEST,
            codes::INVALID_INPUT,
            "invalid input",
            Some(message),
        ),
        RepoError::Integrity { message } => ApiError::new(
            StatusCode::CONFLICT,
            codes::INTEGRITY,
            "integrity constraint violated",
            Some(message),
        ),
        RepoError::Timeout => ApiError::new(
            StatusCode::SERVICE_UNAVAILABLE,
            codes::DB_TIMEOUT,
            "database timeout",
            None,
        ),
        RepoError::Persistence(message) => ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            codes::REPO,
            "persistence error",
            Some(message),
        ),
    }
}

pub(crate) fn ledger_to_api(err: LedgerError) -> ApiError {
    match err {
        LedgerError::InsufficientCredit { .. } => ApiError::new(
            StatusCode::PAYMENT_REQUIRED,
            codes::INSUFFICIENT_CREDIT,
            "insufficient credit",
            Some(err.to_string()),
        ),
        LedgerError::InvalidAmount(_) => ApiError::new(
            StatusCode::BAD_REQUEST,
            codes::INVALID_INPUT,
            "invalid credit amount",
            Some(err.to_string()),
        ),
        LedgerError::Repo(repo) => repo_to_api(repo),
        LedgerError::Consistency { .. } => ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            codes::LEDGER,
            "ledger error",
            Some(err.to_string()),
        ),
    }
}

fn domain_to_api(err: DomainError) -> ApiError {
    match err {
        DomainError::NotFound { .. } => ApiError::not_found("resource not found"),
        DomainError::Validation { .. } => ApiError::new(
            StatusCode::BAD_REQUEST,
            codes::INVALID_INPUT,
            "invalid input",
            Some(err.to_string()),
        ),
        DomainError::IllegalTransition { .. } => ApiError::new(
            StatusCode::CONFLICT,
            codes::INVALID_STATE,
            "report job changed state",
            Some(err.to_string()),
        ),
    }
}

pub(crate) fn orchestrator_to_api(err: OrchestratorError) -> ApiError {
    match err {
        OrchestratorError::Validation(message) => ApiError::new(
            StatusCode::UNPROCESSABLE_ENTITY,
            codes::INVALID_INPUT,
            "report request rejected",
            Some(message),
        ),
        OrchestratorError::InsufficientCredit { .. } => ApiError::new(
            StatusCode::PAYMENT_REQUIRED,
            codes::INSUFFICIENT_CREDIT,
            "insufficient credit",
            Some(err.to_string()),
        ),
        OrchestratorError::NotFound => ApiError::not_found("report job not found"),
        OrchestratorError::InvalidState { .. } => ApiError::new(
            StatusCode::CONFLICT,
            codes::INVALID_STATE,
            "report job is not in a state that allows this",
            Some(err.to_string()),
        ),
        OrchestratorError::Upstream(message) => ApiError::new(
            StatusCode::BAD_GATEWAY,
            codes::UPSTREAM,
            "analysis engine unavailable",
            Some(message),
        ),
        OrchestratorError::Dispatch { .. } => ApiError::new(
            StatusCode::SERVICE_UNAVAILABLE,
            codes::DISPATCH,
            "report job could not be queued",
            Some(err.to_string()),
        ),
        OrchestratorError::Domain(domain) => domain_to_api(domain),
        OrchestratorError::Ledger(ledger) => ledger_to_api(ledger),
        OrchestratorError::Repo(repo) => repo_to_api(repo),
    }
}

pub(crate) fn share_link_to_api(err: ShareLinkError) -> ApiError {
    match err {
        ShareLinkError::Repo(repo) => repo_to_api(repo),
        ShareLinkError::MissingSubjectBinding | ShareLinkError::Validation(_) => ApiError::new(
            StatusCode::BAD_REQUEST,
            codes::INVALID_INPUT,
            "invalid share link request",
            Some(err.to_string()),
        ),
        ShareLinkError::JobNotFound => ApiError::not_found("report job not found"),
        ShareLinkError::JobNotCompleted(_) => ApiError::new(
            StatusCode::CONFLICT,
            codes::INVALID_STATE,
            "report job is not completed",
            Some(err.to_string()),
        ),
        ShareLinkError::NotFound => ApiError::not_found("share link not found"),
        ShareLinkError::AccessDenied(reason) => denial_to_api(reason),
    }
}

fn denial_to_api(reason: AccessDenial) -> ApiError {
    let hint = Some(reason.as_str().to_string());
    match reason {
        AccessDenial::Unknown => ApiError::not_found("share link not found"),
        AccessDenial::Revoked | AccessDenial::Expired | AccessDenial::Exhausted => {
            ApiError::new(
                StatusCode::GONE,
                codes::LINK_GONE,
                "share link is no longer available",
                hint,
            )
        }
        AccessDenial::SubjectMismatch => ApiError::new(
            StatusCode::FORBIDDEN,
            codes::ACCESS_DENIED,
            "subject proof does not match",
            hint,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn insufficient_credit_is_payment_required() {
        let err = orchestrator_to_api(OrchestratorError::InsufficientCredit {
            job_id: Uuid::new_v4(),
            required: 5,
            available: 1,
        });
        assert_eq!(err.status(), StatusCode::PAYMENT_REQUIRED);
        assert_eq!(err.code(), codes::INSUFFICIENT_CREDIT);
    }

    #[test]
    fn spent_links_are_gone_but_unknown_links_are_not_found() {
        let exhausted = share_link_to_api(ShareLinkError::AccessDenied(AccessDenial::Exhausted));
        assert_eq!(exhausted.status(), StatusCode::GONE);

        let unknown = share_link_to_api(ShareLinkError::AccessDenied(AccessDenial::Unknown));
        assert_eq!(unknown.status(), StatusCode::NOT_FOUND);
    }
}
