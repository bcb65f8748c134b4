//! Public share link resolution.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::response::Response;
use serde::Deserialize;
use time::Date;
use time::macros::format_description;

use crate::application::share_links::ShareLinkService;
use crate::domain::subject::SubjectProof;

use super::api::error::ApiError;
use super::api::handlers::{artifact_response, share_link_to_api};

/// Optional subject fact presented by the viewer.
#[derive(Debug, Default, Deserialize)]
pub struct ProofQuery {
    pub birth_date: Option<String>,
    pub issuer: Option<String>,
    pub subject: Option<String>,
}

impl ProofQuery {
    fn into_proof(self) -> Result<Option<SubjectProof>, ApiError> {
        match (self.birth_date, self.issuer, self.subject) {
            (None, None, None) => Ok(None),
            (Some(raw), None, None) => {
                let date = Date::parse(&raw, format_description!("[year]-[month]-[day]"))
                    .map_err(|err| {
                        ApiError::bad_request("invalid birth date", Some(err.to_string()))
                    })?;
                Ok(Some(SubjectProof::BirthDate { date }))
            }
            (None, Some(issuer), Some(subject)) => {
                Ok(Some(SubjectProof::IdentityClaim { issuer, subject }))
            }
            _ => Err(ApiError::bad_request(
                "ambiguous subject proof",
                Some("send either birth_date or issuer and subject".to_string()),
            )),
        }
    }
}

pub async fn resolve_share_link(
    State(share_links): State<Arc<ShareLinkService>>,
    Path(token): Path<String>,
    Query(query): Query<ProofQuery>,
) -> Result<Response, ApiError> {
    let proof = query.into_proof()?;
    let shared = match proof {
        Some(proof) => share_links.resolve_with_proof(&token, &proof).await,
        None => share_links.resolve(&token).await,
    }
    .map_err(share_link_to_api)?;

    Ok(artifact_response(
        &shared.artifact.content_type,
        shared.artifact.body,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    #[test]
    fn birth_date_query_becomes_proof() {
        let query = ProofQuery {
            birth_date: Some("1984-02-29".into()),
            ..ProofQuery::default()
        };
        assert_eq!(
            query.into_proof().expect("proof"),
            Some(SubjectProof::BirthDate {
                date: date!(1984 - 02 - 29)
            })
        );
    }

    #[test]
    fn mixed_proof_kinds_are_rejected() {
        let query = ProofQuery {
            birth_date: Some("1984-02-29".into()),
            issuer: Some("clinic".into()),
            subject: None,
        };
        assert!(query.into_proof().is_err());
    }
}
