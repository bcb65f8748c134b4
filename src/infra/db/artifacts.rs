use time::OffsetDateTime;
use uuid::Uuid;

use crate::application::repos::{ArtifactsRepo, NewArtifact, RepoError};
use crate::domain::entities::ArtifactRecord;
use crate::domain::types::OutputFormat;

use super::{PostgresRepositories, map_sqlx_error};

#[derive(Debug, sqlx::FromRow)]
struct ArtifactRow {
    id: Uuid,
    job_id: Uuid,
    format: OutputFormat,
    content_type: String,
    body: Vec<u8>,
    created_at: OffsetDateTime,
}

impl From<ArtifactRow> for ArtifactRecord {
    fn from(row: ArtifactRow) -> Self {
        ArtifactRecord {
            id: row.id,
            job_id: row.job_id,
            format: row.format,
            content_type: row.content_type,
            body: row.body,
            created_at: row.created_at,
        }
    }
}

#[async_trait::async_trait]
impl ArtifactsRepo for PostgresRepositories {
    async fn insert_artifact(&self, artifact: NewArtifact) -> Result<ArtifactRecord, RepoError> {
        let row = sqlx::query_as::<_, ArtifactRow>(
            "INSERT INTO report_artifacts (id, job_id, format, content_type, body, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             RETURNING id, job_id, format, content_type, body, created_at",
        )
        .bind(Uuid::new_v4())
        .bind(artifact.job_id)
        .bind(artifact.format)
        .bind(artifact.content_type)
        .bind(artifact.body)
        .bind(OffsetDateTime::now_utc())
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.into())
    }

    async fn find_artifact(&self, id: Uuid) -> Result<Option<ArtifactRecord>, RepoError> {
        let row = sqlx::query_as::<_, ArtifactRow>(
            "SELECT id, job_id, format, content_type, body, created_at \
             FROM report_artifacts WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.map(ArtifactRecord::from))
    }
}
