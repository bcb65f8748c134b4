mod context;
mod dispatch;
mod generate;
mod reap;

pub use context::{ReaperContext, ReportWorkerContext, job_failed};
pub use dispatch::{
    ApalisDispatcher, DispatchError, JobDispatcher, LocalDispatcher, spawn_local_worker,
};
pub use generate::{GENERATE_REPORT_QUEUE, GenerateReportJob, process_generate_report_job};
pub use reap::{ReapStalledJobs, process_reap_stalled_jobs, reaper_schedule};
