use std::sync::Arc;

use metrics::counter;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use thiserror::Error;
use time::{Duration, OffsetDateTime};
use tracing::{debug, info};
use uuid::Uuid;

use crate::application::orchestrator::CallerContext;
use crate::application::repos::{
    ArtifactsRepo, ConsumeOutcome, NewShareLink, RepoError, ReportJobsRepo, ShareLinksRepo,
};
use crate::domain::entities::{AccessDenial, ArtifactRecord, ReportJobRecord, ShareLinkRecord};
use crate::domain::error::DomainError;
use crate::domain::subject::{SubjectBinding, SubjectProof};
use crate::domain::types::JobStage;

const TOKEN_PREFIX: &str = "sl";
const MIN_SECRET_LEN: usize = 32;

pub(crate) const METRIC_SHARE_RESOLVED: &str = "healthreport_share_links_resolved_total";
pub(crate) const METRIC_SHARE_DENIED: &str = "healthreport_share_links_denied_total";

#[derive(Debug, Error)]
pub enum ShareLinkError {
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error("share link requires a subject binding")]
    MissingSubjectBinding,
    #[error("invalid share link request: {0}")]
    Validation(String),
    #[error("report job not found")]
    JobNotFound,
    #[error("report job is {0} and cannot be shared")]
    JobNotCompleted(JobStage),
    #[error("share link not found")]
    NotFound,
    #[error("access denied: {}", .0.as_str())]
    AccessDenied(AccessDenial),
}

impl From<DomainError> for ShareLinkError {
    fn from(err: DomainError) -> Self {
        Self::Validation(err.to_string())
    }
}

/// Bounds applied to newly issued links.
#[derive(Debug, Clone, Copy)]
pub struct ShareLinkPolicy {
    pub max_expiry_days: u32,
    pub default_max_access_count: u32,
}

impl Default for ShareLinkPolicy {
    fn default() -> Self {
        Self {
            max_expiry_days: 30,
            default_max_access_count: 5,
        }
    }
}

#[derive(Debug, Clone)]
pub struct IssueShareLinkCommand {
    pub job_id: Uuid,
    pub subject_binding: Option<SubjectBinding>,
    pub expiry_days: u32,
    pub max_access_count: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct ShareLinkIssued {
    pub record: ShareLinkRecord,
    pub token: String,
}

/// Artifact released by a successful resolution.
#[derive(Debug, Clone)]
pub struct SharedReport {
    pub link: ShareLinkRecord,
    pub artifact: ArtifactRecord,
}

#[derive(Clone)]
pub struct ShareLinkService {
    links: Arc<dyn ShareLinksRepo>,
    jobs: Arc<dyn ReportJobsRepo>,
    artifacts: Arc<dyn ArtifactsRepo>,
    policy: ShareLinkPolicy,
}

impl ShareLinkService {
    pub fn new(
        links: Arc<dyn ShareLinksRepo>,
        jobs: Arc<dyn ReportJobsRepo>,
        artifacts: Arc<dyn ArtifactsRepo>,
        policy: ShareLinkPolicy,
    ) -> Self {
        Self {
            links,
            jobs,
            artifacts,
            policy,
        }
    }

    pub async fn issue(
        &self,
        ctx: &CallerContext,
        cmd: IssueShareLinkCommand,
    ) -> Result<ShareLinkIssued, ShareLinkError> {
        let binding = cmd
            .subject_binding
            .ok_or(ShareLinkError::MissingSubjectBinding)?;
        let now = OffsetDateTime::now_utc();
        binding.validate(now.date())?;

        if cmd.expiry_days == 0 || cmd.expiry_days > self.policy.max_expiry_days {
            return Err(ShareLinkError::Validation(format!(
                "expiry must be between 1 and {} days",
                self.policy.max_expiry_days
            )));
        }
        let max_access_count = cmd
            .max_access_count
            .unwrap_or(self.policy.default_max_access_count);
        let max_access_count = i32::try_from(max_access_count)
            .ok()
            .filter(|count| *count >= 1)
            .ok_or_else(|| {
                ShareLinkError::Validation("max access count must be at least 1".to_string())
            })?;

        let job = self.owned_job(ctx, cmd.job_id).await?;
        if job.stage != JobStage::Completed {
            return Err(ShareLinkError::JobNotCompleted(job.stage));
        }

        let prefix = Self::generate_prefix();
        let secret = Self::generate_secret();
        let token = format!("{TOKEN_PREFIX}_{prefix}_{secret}");

        let record = self
            .links
            .create_link(NewShareLink {
                prefix,
                hashed_secret: Self::hash_secret(&secret),
                job_id: job.id,
                subject_binding: binding,
                expires_at: now + Duration::days(i64::from(cmd.expiry_days)),
                max_access_count,
                created_by: ctx.requester_id.clone(),
            })
            .await?;

        info!(
            target = "healthreport::application::share_links",
            link_id = %record.id,
            job_id = %record.job_id,
            expires_at = %record.expires_at,
            max_access_count,
            "share link issued"
        );
        Ok(ShareLinkIssued { record, token })
    }

    /// Open a link, spending one access.
    pub async fn resolve(&self, token: &str) -> Result<SharedReport, ShareLinkError> {
        self.resolve_at(token, None, OffsetDateTime::now_utc()).await
    }

    /// Open a link after checking the viewer's subject proof.
    ///
    /// A mismatched proof is denied without spending an access.
    pub async fn resolve_with_proof(
        &self,
        token: &str,
        proof: &SubjectProof,
    ) -> Result<SharedReport, ShareLinkError> {
        self.resolve_at(token, Some(proof), OffsetDateTime::now_utc())
            .await
    }

    pub async fn resolve_at(
        &self,
        token: &str,
        proof: Option<&SubjectProof>,
        now: OffsetDateTime,
    ) -> Result<SharedReport, ShareLinkError> {
        let link = self.authenticate(token).await.inspect_err(deny_metric)?;

        if let Some(proof) = proof
            && !link.subject_binding.matches(proof)
        {
            return Err(denied(link.id, AccessDenial::SubjectMismatch));
        }

        let link = match self.links.consume_access(link.id, now).await? {
            ConsumeOutcome::Granted(link) => link,
            ConsumeOutcome::Denied(reason) => return Err(denied(link.id, reason)),
        };

        let artifact = self.artifact_for(link.job_id).await?;
        counter!(METRIC_SHARE_RESOLVED).increment(1);
        debug!(
            target = "healthreport::application::share_links",
            link_id = %link.id,
            access_count = link.access_count,
            max_access_count = link.max_access_count,
            "share link resolved"
        );
        Ok(SharedReport { link, artifact })
    }

    pub async fn revoke(
        &self,
        ctx: &CallerContext,
        link_id: Uuid,
    ) -> Result<ShareLinkRecord, ShareLinkError> {
        let link = self
            .links
            .find_link(link_id)
            .await?
            .ok_or(ShareLinkError::NotFound)?;
        self.owned_job(ctx, link.job_id)
            .await
            .map_err(|_| ShareLinkError::NotFound)?;

        let revoked = self
            .links
            .revoke_link(link_id, OffsetDateTime::now_utc())
            .await?
            .ok_or(ShareLinkError::NotFound)?;
        info!(
            target = "healthreport::application::share_links",
            link_id = %link_id,
            requester_id = %ctx.requester_id,
            "share link revoked"
        );
        Ok(revoked)
    }

    pub async fn list_for_job(
        &self,
        ctx: &CallerContext,
        job_id: Uuid,
    ) -> Result<Vec<ShareLinkRecord>, ShareLinkError> {
        self.owned_job(ctx, job_id).await?;
        Ok(self.links.list_for_job(job_id).await?)
    }

    async fn authenticate(&self, token: &str) -> Result<ShareLinkRecord, ShareLinkError> {
        let unknown = ShareLinkError::AccessDenied(AccessDenial::Unknown);
        let Some((prefix, secret)) = Self::parse_token(token) else {
            return Err(unknown);
        };
        let Some(link) = self.links.find_by_prefix(prefix).await? else {
            return Err(unknown);
        };

        let hashed_input = Self::hash_secret(secret);
        if link.hashed_secret.ct_eq(&hashed_input).unwrap_u8() == 0 {
            return Err(unknown);
        }
        Ok(link)
    }

    async fn owned_job(
        &self,
        ctx: &CallerContext,
        job_id: Uuid,
    ) -> Result<ReportJobRecord, ShareLinkError> {
        match self.jobs.find_job(job_id).await? {
            Some(job) if job.account_id == ctx.account_id => Ok(job),
            _ => Err(ShareLinkError::JobNotFound),
        }
    }

    async fn artifact_for(&self, job_id: Uuid) -> Result<ArtifactRecord, ShareLinkError> {
        let artifact_id = self
            .jobs
            .find_job(job_id)
            .await?
            .and_then(|job| job.rendered_artifact_id)
            .ok_or(ShareLinkError::NotFound)?;
        self.artifacts
            .find_artifact(artifact_id)
            .await?
            .ok_or(ShareLinkError::NotFound)
    }

    fn hash_secret(secret: &str) -> Vec<u8> {
        let mut hasher = Sha256::new();
        hasher.update(secret.as_bytes());
        hasher.finalize().to_vec()
    }

    fn generate_prefix() -> String {
        Uuid::new_v4().simple().to_string()[..12].to_string()
    }

    fn generate_secret() -> String {
        format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple())
    }

    fn parse_token(token: &str) -> Option<(&str, &str)> {
        let mut parts = token.splitn(3, '_');
        if parts.next()? != TOKEN_PREFIX {
            return None;
        }
        let prefix = parts.next()?;
        let secret = parts.next()?;
        if prefix.is_empty() || secret.len() < MIN_SECRET_LEN {
            return None;
        }
        Some((prefix, secret))
    }
}

fn denied(link_id: Uuid, reason: AccessDenial) -> ShareLinkError {
    let err = ShareLinkError::AccessDenied(reason);
    deny_metric(&err);
    debug!(
        target = "healthreport::application::share_links",
        link_id = %link_id,
        reason = reason.as_str(),
        "share link access denied"
    );
    err
}

fn deny_metric(err: &ShareLinkError) {
    if let ShareLinkError::AccessDenied(reason) = err {
        counter!(METRIC_SHARE_DENIED, "reason" => reason.as_str()).increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_token_requires_tag_and_long_secret() {
        let secret = "a".repeat(MIN_SECRET_LEN);
        let token = format!("sl_abc123_{secret}");
        assert_eq!(
            ShareLinkService::parse_token(&token),
            Some(("abc123", secret.as_str()))
        );
        assert!(ShareLinkService::parse_token(&format!("sk_abc123_{secret}")).is_none());
        assert!(ShareLinkService::parse_token("sl_abc123_short").is_none());
        assert!(ShareLinkService::parse_token(&format!("sl__{secret}")).is_none());
    }

    #[test]
    fn generated_secret_satisfies_parser() {
        let token = format!(
            "{TOKEN_PREFIX}_{}_{}",
            ShareLinkService::generate_prefix(),
            ShareLinkService::generate_secret()
        );
        assert!(ShareLinkService::parse_token(&token).is_some());
    }
}
