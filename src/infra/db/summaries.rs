use sqlx::PgPool;

use crate::application::repos::{RepoError, SummariesRepo};
use crate::domain::measurement::MeasurementSummary;

use super::util::{json_column, to_json};
use super::{PostgresRepositories, map_sqlx_error};

#[derive(Debug, sqlx::FromRow)]
struct SummaryRow {
    session_id: String,
    subject_id: String,
    quality_score: i16,
    per_signal_metrics: serde_json::Value,
}

impl TryFrom<SummaryRow> for MeasurementSummary {
    type Error = RepoError;

    fn try_from(row: SummaryRow) -> Result<Self, Self::Error> {
        let quality_score = u8::try_from(row.quality_score).map_err(|_| RepoError::Integrity {
            message: format!("quality score {} out of range", row.quality_score),
        })?;
        Ok(MeasurementSummary {
            session_id: row.session_id,
            subject_id: row.subject_id,
            quality_score,
            per_signal_metrics: json_column(
                "measurement_summaries.per_signal_metrics",
                row.per_signal_metrics,
            )?,
        })
    }
}

pub(super) async fn upsert(pool: &PgPool, summary: &MeasurementSummary) -> Result<(), RepoError> {
    sqlx::query(
        "INSERT INTO measurement_summaries (session_id, subject_id, quality_score, per_signal_metrics) \
         VALUES ($1, $2, $3, $4) \
         ON CONFLICT (session_id) DO UPDATE SET subject_id = EXCLUDED.subject_id, \
             quality_score = EXCLUDED.quality_score, \
             per_signal_metrics = EXCLUDED.per_signal_metrics",
    )
    .bind(&summary.session_id)
    .bind(&summary.subject_id)
    .bind(i16::from(summary.quality_score))
    .bind(to_json(&summary.per_signal_metrics)?)
    .execute(pool)
    .await
    .map_err(map_sqlx_error)?;
    Ok(())
}

#[async_trait::async_trait]
impl SummariesRepo for PostgresRepositories {
    async fn get_summary(
        &self,
        session_id: &str,
    ) -> Result<Option<MeasurementSummary>, RepoError> {
        let row = sqlx::query_as::<_, SummaryRow>(
            "SELECT session_id, subject_id, quality_score, per_signal_metrics \
             FROM measurement_summaries WHERE session_id = $1",
        )
        .bind(session_id)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        row.map(MeasurementSummary::try_from).transpose()
    }
}
