//! Cron sweep for report jobs abandoned by a crashed worker.

use std::str::FromStr;

use apalis::prelude::*;
use apalis_cron::Schedule;

use super::context::ReaperContext;

/// Marker struct for the cron-triggered reaper.
/// Must implement `From<chrono::DateTime<chrono::Utc>>` for apalis-cron compatibility.
#[derive(Default, Debug, Clone)]
pub struct ReapStalledJobs;

impl From<chrono::DateTime<chrono::Utc>> for ReapStalledJobs {
    fn from(_: chrono::DateTime<chrono::Utc>) -> Self {
        Self
    }
}

pub async fn process_reap_stalled_jobs(
    _job: ReapStalledJobs,
    ctx: Data<ReaperContext>,
) -> Result<(), apalis::prelude::Error> {
    match ctx
        .orchestrator
        .reap_stalled(ctx.stalled_after, ctx.batch_size)
        .await
    {
        Ok(report) if report != Default::default() => {
            tracing::info!(
                failed_jobs = report.failed_jobs,
                charged = report.charged,
                refunded = report.refunded,
                "Reaped stalled report jobs"
            );
        }
        Err(err) => {
            tracing::warn!(error = %err, "Failed to reap stalled report jobs");
        }
        _ => {}
    }
    Ok(())
}

/// Parse the configured reaper schedule (seconds-resolution cron syntax).
pub fn reaper_schedule(expression: &str) -> Result<Schedule, String> {
    Schedule::from_str(expression).map_err(|err| err.to_string())
}
