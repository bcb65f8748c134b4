use apalis::prelude::{Data, Error as ApalisError};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use super::context::{ReportWorkerContext, job_failed};

/// Name of the apalis queue carrying [`GenerateReportJob`] payloads.
pub const GENERATE_REPORT_QUEUE: &str = "generate_report";

/// Queue payload naming the job to run; everything else is read from storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateReportJob {
    pub job_id: Uuid,
}

pub async fn process_generate_report_job(
    job: GenerateReportJob,
    ctx: Data<ReportWorkerContext>,
) -> Result<(), ApalisError> {
    let record = ctx
        .orchestrator
        .execute(job.job_id)
        .await
        .map_err(job_failed)?;

    info!(
        target = "healthreport::application::jobs::generate",
        job_id = %record.id,
        stage = record.stage.as_str(),
        "report job processed"
    );
    Ok(())
}
