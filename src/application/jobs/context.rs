use std::sync::Arc;
use std::time::Duration;

use apalis::prelude::Error as ApalisError;

use crate::application::orchestrator::ReportOrchestrator;

/// Shared context handed to report workers.
#[derive(Clone)]
pub struct ReportWorkerContext {
    pub orchestrator: ReportOrchestrator,
}

/// Context for the stalled-job reaper.
#[derive(Clone)]
pub struct ReaperContext {
    pub orchestrator: ReportOrchestrator,
    pub stalled_after: Duration,
    pub batch_size: u32,
}

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Convert any error into an [`ApalisError::Failed`].
pub fn job_failed<E>(err: E) -> ApalisError
where
    E: std::error::Error + Send + Sync + 'static,
{
    let boxed: BoxError = Box::new(err);
    ApalisError::Failed(Arc::new(boxed))
}
