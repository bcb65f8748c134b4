use time::OffsetDateTime;
use uuid::Uuid;

use crate::application::repos::{NewReportJob, RepoError, ReportJobsRepo, StageTransition};
use crate::domain::entities::{ReportJobRecord, StageTimestamps};
use crate::domain::types::JobStage;

use super::util::{json_column, to_json};
use super::{PostgresRepositories, map_sqlx_error};

const JOB_COLUMNS: &str = "id, account_id, organization_id, requester_id, session_id, \
    engine_id, engine_version, renderer_id, renderer_version, stage, analysis_result, \
    rendered_artifact_id, reserved_amount, error_info, attempts, created_at, updated_at, \
    queued_at, analyzing_at, rendering_at, finished_at";

#[derive(Debug, sqlx::FromRow)]
struct ReportJobRow {
    id: Uuid,
    account_id: String,
    organization_id: Option<String>,
    requester_id: String,
    session_id: String,
    engine_id: String,
    engine_version: String,
    renderer_id: String,
    renderer_version: String,
    stage: JobStage,
    analysis_result: Option<serde_json::Value>,
    rendered_artifact_id: Option<Uuid>,
    reserved_amount: i64,
    error_info: Option<String>,
    attempts: i32,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
    queued_at: Option<OffsetDateTime>,
    analyzing_at: Option<OffsetDateTime>,
    rendering_at: Option<OffsetDateTime>,
    finished_at: Option<OffsetDateTime>,
}

impl TryFrom<ReportJobRow> for ReportJobRecord {
    type Error = RepoError;

    fn try_from(row: ReportJobRow) -> Result<Self, Self::Error> {
        let analysis_result = row
            .analysis_result
            .map(|value| json_column("report_jobs.analysis_result", value))
            .transpose()?;

        Ok(ReportJobRecord {
            id: row.id,
            account_id: row.account_id,
            organization_id: row.organization_id,
            requester_id: row.requester_id,
            session_id: row.session_id,
            engine_id: row.engine_id,
            engine_version: row.engine_version,
            renderer_id: row.renderer_id,
            renderer_version: row.renderer_version,
            stage: row.stage,
            analysis_result,
            rendered_artifact_id: row.rendered_artifact_id,
            reserved_amount: row.reserved_amount,
            error_info: row.error_info,
            attempts: row.attempts,
            created_at: row.created_at,
            updated_at: row.updated_at,
            stage_timestamps: StageTimestamps {
                queued_at: row.queued_at,
                analyzing_at: row.analyzing_at,
                rendering_at: row.rendering_at,
                finished_at: row.finished_at,
            },
        })
    }
}

fn into_records(rows: Vec<ReportJobRow>) -> Result<Vec<ReportJobRecord>, RepoError> {
    rows.into_iter().map(ReportJobRecord::try_from).collect()
}

#[async_trait::async_trait]
impl ReportJobsRepo for PostgresRepositories {
    async fn create_job(&self, job: NewReportJob) -> Result<ReportJobRecord, RepoError> {
        let now = OffsetDateTime::now_utc();
        let row = sqlx::query_as::<_, ReportJobRow>(&format!(
            "INSERT INTO report_jobs (id, account_id, organization_id, requester_id, session_id, \
             engine_id, engine_version, renderer_id, renderer_version, stage, reserved_amount, \
             created_at, updated_at, queued_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $12, $12) \
             RETURNING {JOB_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(&job.account_id)
        .bind(&job.organization_id)
        .bind(&job.requester_id)
        .bind(&job.session_id)
        .bind(&job.engine_id)
        .bind(&job.engine_version)
        .bind(&job.renderer_id)
        .bind(&job.renderer_version)
        .bind(JobStage::Queued)
        .bind(job.reserved_amount)
        .bind(now)
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        ReportJobRecord::try_from(row)
    }

    async fn find_job(&self, id: Uuid) -> Result<Option<ReportJobRecord>, RepoError> {
        let row = sqlx::query_as::<_, ReportJobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM report_jobs WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        row.map(ReportJobRecord::try_from).transpose()
    }

    async fn transition(
        &self,
        transition: StageTransition,
    ) -> Result<Option<ReportJobRecord>, RepoError> {
        let analysis = transition
            .analysis_result
            .as_ref()
            .map(to_json)
            .transpose()?;

        let row = sqlx::query_as::<_, ReportJobRow>(&format!(
            "UPDATE report_jobs SET \
                stage = $3, \
                updated_at = $4, \
                analysis_result = COALESCE($5, analysis_result), \
                rendered_artifact_id = COALESCE($6, rendered_artifact_id), \
                error_info = COALESCE($7, error_info), \
                attempts = COALESCE($8, attempts), \
                analyzing_at = CASE WHEN $3 = 'analyzing'::report_stage THEN $4 ELSE analyzing_at END, \
                rendering_at = CASE WHEN $3 = 'rendering'::report_stage THEN $4 ELSE rendering_at END, \
                finished_at = CASE WHEN $3 IN ('completed'::report_stage, 'failed'::report_stage) \
                    THEN $4 ELSE finished_at END \
             WHERE id = $1 AND stage = $2 \
             RETURNING {JOB_COLUMNS}"
        ))
        .bind(transition.id)
        .bind(transition.from)
        .bind(transition.to)
        .bind(transition.at)
        .bind(analysis)
        .bind(transition.rendered_artifact_id)
        .bind(transition.error_info)
        .bind(transition.attempts)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        row.map(ReportJobRecord::try_from).transpose()
    }

    async fn list_for_account(
        &self,
        account_id: &str,
        limit: u32,
    ) -> Result<Vec<ReportJobRecord>, RepoError> {
        let rows = sqlx::query_as::<_, ReportJobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM report_jobs WHERE account_id = $1 \
             ORDER BY created_at DESC, id DESC LIMIT $2"
        ))
        .bind(account_id)
        .bind(i64::from(limit))
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        into_records(rows)
    }

    async fn list_stalled(
        &self,
        updated_before: OffsetDateTime,
        limit: u32,
    ) -> Result<Vec<ReportJobRecord>, RepoError> {
        let rows = sqlx::query_as::<_, ReportJobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM report_jobs \
             WHERE stage NOT IN ('completed'::report_stage, 'failed'::report_stage) \
               AND updated_at < $1 \
             ORDER BY updated_at LIMIT $2"
        ))
        .bind(updated_before)
        .bind(i64::from(limit))
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        into_records(rows)
    }
}
