use time::OffsetDateTime;
use uuid::Uuid;

use crate::application::repos::{ConsumeOutcome, NewShareLink, RepoError, ShareLinksRepo};
use crate::domain::entities::{AccessDenial, ShareLinkRecord};

use super::util::{json_column, to_json};
use super::{PostgresRepositories, map_sqlx_error};

const LINK_COLUMNS: &str = "id, prefix, hashed_secret, job_id, subject_binding, expires_at, \
    max_access_count, access_count, created_by, created_at, revoked_at";

#[derive(Debug, sqlx::FromRow)]
struct ShareLinkRow {
    id: Uuid,
    prefix: String,
    hashed_secret: Vec<u8>,
    job_id: Uuid,
    subject_binding: serde_json::Value,
    expires_at: OffsetDateTime,
    max_access_count: i32,
    access_count: i32,
    created_by: String,
    created_at: OffsetDateTime,
    revoked_at: Option<OffsetDateTime>,
}

impl TryFrom<ShareLinkRow> for ShareLinkRecord {
    type Error = RepoError;

    fn try_from(row: ShareLinkRow) -> Result<Self, Self::Error> {
        Ok(ShareLinkRecord {
            id: row.id,
            prefix: row.prefix,
            hashed_secret: row.hashed_secret,
            job_id: row.job_id,
            subject_binding: json_column("share_links.subject_binding", row.subject_binding)?,
            expires_at: row.expires_at,
            max_access_count: row.max_access_count,
            access_count: row.access_count,
            created_by: row.created_by,
            created_at: row.created_at,
            revoked_at: row.revoked_at,
        })
    }
}

#[async_trait::async_trait]
impl ShareLinksRepo for PostgresRepositories {
    async fn create_link(&self, link: NewShareLink) -> Result<ShareLinkRecord, RepoError> {
        let row = sqlx::query_as::<_, ShareLinkRow>(&format!(
            "INSERT INTO share_links (id, prefix, hashed_secret, job_id, subject_binding, \
             expires_at, max_access_count, access_count, created_by, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, 0, $8, $9) RETURNING {LINK_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(&link.prefix)
        .bind(&link.hashed_secret)
        .bind(link.job_id)
        .bind(to_json(&link.subject_binding)?)
        .bind(link.expires_at)
        .bind(link.max_access_count)
        .bind(&link.created_by)
        .bind(OffsetDateTime::now_utc())
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        ShareLinkRecord::try_from(row)
    }

    async fn find_link(&self, id: Uuid) -> Result<Option<ShareLinkRecord>, RepoError> {
        let row = sqlx::query_as::<_, ShareLinkRow>(&format!(
            "SELECT {LINK_COLUMNS} FROM share_links WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        row.map(ShareLinkRecord::try_from).transpose()
    }

    async fn find_by_prefix(&self, prefix: &str) -> Result<Option<ShareLinkRecord>, RepoError> {
        let row = sqlx::query_as::<_, ShareLinkRow>(&format!(
            "SELECT {LINK_COLUMNS} FROM share_links WHERE prefix = $1"
        ))
        .bind(prefix)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        row.map(ShareLinkRecord::try_from).transpose()
    }

    async fn consume_access(
        &self,
        id: Uuid,
        now: OffsetDateTime,
    ) -> Result<ConsumeOutcome, RepoError> {
        let granted = sqlx::query_as::<_, ShareLinkRow>(&format!(
            "UPDATE share_links SET access_count = access_count + 1 \
             WHERE id = $1 AND revoked_at IS NULL AND expires_at > $2 \
               AND access_count < max_access_count \
             RETURNING {LINK_COLUMNS}"
        ))
        .bind(id)
        .bind(now)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        if let Some(row) = granted {
            return Ok(ConsumeOutcome::Granted(ShareLinkRecord::try_from(row)?));
        }

        // The conditional update matched nothing; read the row to explain why.
        let denial = match self.find_link(id).await? {
            None => AccessDenial::Unknown,
            Some(link) => link.denial_at(now).unwrap_or(AccessDenial::Exhausted),
        };
        Ok(ConsumeOutcome::Denied(denial))
    }

    async fn revoke_link(
        &self,
        id: Uuid,
        revoked_at: OffsetDateTime,
    ) -> Result<Option<ShareLinkRecord>, RepoError> {
        let row = sqlx::query_as::<_, ShareLinkRow>(&format!(
            "UPDATE share_links SET revoked_at = COALESCE(revoked_at, $2) \
             WHERE id = $1 RETURNING {LINK_COLUMNS}"
        ))
        .bind(id)
        .bind(revoked_at)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        row.map(ShareLinkRecord::try_from).transpose()
    }

    async fn list_for_job(&self, job_id: Uuid) -> Result<Vec<ShareLinkRecord>, RepoError> {
        let rows = sqlx::query_as::<_, ShareLinkRow>(&format!(
            "SELECT {LINK_COLUMNS} FROM share_links WHERE job_id = $1 ORDER BY created_at"
        ))
        .bind(job_id)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter().map(ShareLinkRecord::try_from).collect()
    }
}
