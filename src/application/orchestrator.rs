//! Report generation pipeline.
//!
//! A job moves `queued -> analyzing -> rendering -> completed`, or to `failed`
//! from any non-terminal stage. Every move is a compare-and-set on the stage
//! the caller last observed. Whoever wins the move into a terminal stage
//! settles the job's reservation, so a job is charged or refunded once even
//! when a worker, a cancellation and the stalled-job reaper race.

use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::{counter, histogram};
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::application::capabilities::{AnalysisOptions, CapabilityError, RenderOptions};
use crate::application::jobs::JobDispatcher;
use crate::application::ledger::{CreditLedger, LedgerError};
use crate::application::registry::{RegisteredEngine, RegisteredRenderer, Registry};
use crate::application::repos::{
    ArtifactsRepo, NewArtifact, NewReportJob, RepoError, ReportJobsRepo, StageTransition,
    SummariesRepo,
};
use crate::domain::entities::{ArtifactRecord, ReportJobRecord};
use crate::domain::error::DomainError;
use crate::domain::measurement::{AnalysisResult, MeasurementSummary, RenderedArtifact};
use crate::domain::types::{AccessControl, JobStage};

pub(crate) const METRIC_JOBS_SUBMITTED: &str = "healthreport_jobs_submitted_total";
pub(crate) const METRIC_JOBS_COMPLETED: &str = "healthreport_jobs_completed_total";
pub(crate) const METRIC_JOBS_FAILED: &str = "healthreport_jobs_failed_total";
pub(crate) const METRIC_ENGINE_MS: &str = "healthreport_engine_analyze_ms";
pub(crate) const METRIC_RENDER_MS: &str = "healthreport_renderer_render_ms";

const ENGINE_ATTEMPTS: i32 = 2;

pub const ERROR_INSUFFICIENT_CREDIT: &str = "insufficient_credit";
pub const ERROR_CANCELLED: &str = "cancelled";
pub const ERROR_STALLED: &str = "stalled";
pub const ERROR_DISPATCH_FAILED: &str = "dispatch_failed";

/// Authenticated caller on whose behalf an operation runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerContext {
    pub account_id: String,
    pub organization_id: Option<String>,
    pub requester_id: String,
}

#[derive(Debug, Clone)]
pub struct SubmitReportCommand {
    pub session_id: String,
    pub engine_id: String,
    pub renderer_id: String,
}

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("insufficient credit for job {job_id}: {required} required, {available} available")]
    InsufficientCredit {
        job_id: Uuid,
        required: i64,
        available: i64,
    },
    #[error("report job not found")]
    NotFound,
    #[error("report job {job_id} is {stage} and cannot be {action}")]
    InvalidState {
        job_id: Uuid,
        stage: JobStage,
        action: &'static str,
    },
    #[error("engine could not check the summary: {0}")]
    Upstream(String),
    #[error("job {job_id} could not be queued: {message}")]
    Dispatch { job_id: Uuid, message: String },
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Repo(#[from] RepoError),
}

impl OrchestratorError {
    fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}

/// Counts from one reaper sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReapReport {
    pub failed_jobs: usize,
    pub charged: usize,
    pub refunded: usize,
}

#[derive(Clone)]
pub struct ReportOrchestrator {
    registry: Arc<Registry>,
    ledger: CreditLedger,
    jobs: Arc<dyn ReportJobsRepo>,
    artifacts: Arc<dyn ArtifactsRepo>,
    summaries: Arc<dyn SummariesRepo>,
    dispatcher: Arc<dyn JobDispatcher>,
}

impl ReportOrchestrator {
    pub fn new(
        registry: Arc<Registry>,
        ledger: CreditLedger,
        jobs: Arc<dyn ReportJobsRepo>,
        artifacts: Arc<dyn ArtifactsRepo>,
        summaries: Arc<dyn SummariesRepo>,
        dispatcher: Arc<dyn JobDispatcher>,
    ) -> Self {
        Self {
            registry,
            ledger,
            jobs,
            artifacts,
            summaries,
            dispatcher,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Validate, persist, reserve and queue a report job.
    ///
    /// Nothing is persisted and no credit moves when validation fails.
    #[instrument(skip(self, ctx), fields(account_id = %ctx.account_id))]
    pub async fn submit(
        &self,
        ctx: &CallerContext,
        cmd: SubmitReportCommand,
    ) -> Result<ReportJobRecord, OrchestratorError> {
        if ctx.account_id.trim().is_empty() || ctx.requester_id.trim().is_empty() {
            return Err(OrchestratorError::validation(
                "caller must carry an account and a requester",
            ));
        }

        let (engine, renderer) = self
            .registry
            .resolve_pair(&cmd.engine_id, &cmd.renderer_id)
            .map_err(|err| OrchestratorError::Validation(err.to_string()))?;

        if renderer.descriptor.access_control == AccessControl::Organization
            && ctx.organization_id.is_none()
        {
            return Err(OrchestratorError::validation(format!(
                "renderer `{}` is restricted to organization accounts",
                renderer.descriptor.id
            )));
        }

        let summary = self
            .summaries
            .get_summary(&cmd.session_id)
            .await?
            .ok_or_else(|| {
                OrchestratorError::validation(format!("unknown session `{}`", cmd.session_id))
            })?;
        self.check_summary(&engine, &summary).await?;

        let cost = engine
            .descriptor
            .cost_per_analysis
            .checked_add(renderer.descriptor.cost_per_render)
            .ok_or_else(|| OrchestratorError::validation("combined cost overflows"))?;

        let job = self
            .jobs
            .create_job(NewReportJob {
                account_id: ctx.account_id.clone(),
                organization_id: ctx.organization_id.clone(),
                requester_id: ctx.requester_id.clone(),
                session_id: cmd.session_id,
                engine_id: engine.descriptor.id.clone(),
                engine_version: engine.descriptor.version.clone(),
                renderer_id: renderer.descriptor.id.clone(),
                renderer_version: renderer.descriptor.version.clone(),
                reserved_amount: cost,
            })
            .await?;
        counter!(METRIC_JOBS_SUBMITTED).increment(1);

        match self.ledger.reserve(&ctx.account_id, cost, job.id).await {
            Ok(_) => {}
            Err(LedgerError::InsufficientCredit {
                required,
                available,
            }) => {
                self.record_failure(job.id, JobStage::Queued, ERROR_INSUFFICIENT_CREDIT)
                    .await?;
                return Err(OrchestratorError::InsufficientCredit {
                    job_id: job.id,
                    required,
                    available,
                });
            }
            Err(err) => {
                self.record_failure(job.id, JobStage::Queued, "ledger_error")
                    .await?;
                return Err(err.into());
            }
        }

        if let Err(err) = self.dispatcher.dispatch(job.id).await {
            warn!(
                target = "healthreport::application::orchestrator",
                job_id = %job.id,
                error = %err,
                "dispatch failed; refunding"
            );
            self.fail_and_refund(job.id, JobStage::Queued, ERROR_DISPATCH_FAILED.to_string(), None)
                .await?;
            return Err(OrchestratorError::Dispatch {
                job_id: job.id,
                message: err.0,
            });
        }

        info!(
            target = "healthreport::application::orchestrator",
            job_id = %job.id,
            engine_id = %job.engine_id,
            renderer_id = %job.renderer_id,
            cost,
            "report job queued"
        );
        Ok(job)
    }

    async fn check_summary(
        &self,
        engine: &RegisteredEngine,
        summary: &MeasurementSummary,
    ) -> Result<(), OrchestratorError> {
        let descriptor = &engine.descriptor;
        if !descriptor.supports_any(&summary.data_types()) {
            return Err(OrchestratorError::validation(format!(
                "engine `{}` supports none of the session's signal types",
                descriptor.id
            )));
        }
        if summary.quality_score < descriptor.quality_threshold {
            return Err(OrchestratorError::validation(format!(
                "quality score {} is below the engine threshold {}",
                summary.quality_score, descriptor.quality_threshold
            )));
        }

        let validation = tokio::time::timeout(descriptor.timeout, engine.capability.validate(summary))
            .await
            .map_err(|_| OrchestratorError::Upstream("validation timed out".to_string()))?
            .map_err(|err| OrchestratorError::Upstream(err.to_string()))?;
        if !validation.is_valid {
            let reason = if validation.errors.is_empty() {
                "engine rejected the summary".to_string()
            } else {
                validation.errors.join("; ")
            };
            return Err(OrchestratorError::Validation(reason));
        }
        Ok(())
    }

    /// Run a queued job to a terminal stage. Safe to call again for a job
    /// that already left `queued`; the call then reports the current state.
    #[instrument(skip(self))]
    pub async fn execute(&self, job_id: Uuid) -> Result<ReportJobRecord, OrchestratorError> {
        let job = self
            .jobs
            .find_job(job_id)
            .await?
            .ok_or(OrchestratorError::NotFound)?;
        if job.stage != JobStage::Queued {
            debug!(
                target = "healthreport::application::orchestrator",
                job_id = %job_id,
                stage = job.stage.as_str(),
                "job already picked up"
            );
            return Ok(job);
        }

        let Some(engine) = self
            .registry
            .engine_version(&job.engine_id, &job.engine_version)
            .cloned()
        else {
            return self
                .fail_and_refund(job_id, JobStage::Queued, "engine_unavailable".to_string(), None)
                .await;
        };
        let Some(renderer) = self
            .registry
            .renderer_version(&job.renderer_id, &job.renderer_version)
            .cloned()
        else {
            return self
                .fail_and_refund(job_id, JobStage::Queued, "renderer_unavailable".to_string(), None)
                .await;
        };

        let Some(job) = self
            .apply(StageTransition::new(job_id, JobStage::Queued, JobStage::Analyzing))
            .await?
        else {
            return self.current(job_id).await;
        };

        let Some(summary) = self.summaries.get_summary(&job.session_id).await? else {
            return self
                .fail_and_refund(job_id, JobStage::Analyzing, "summary_missing".to_string(), None)
                .await;
        };

        let (analysis, attempts) = match self.analyze(&engine, &summary).await {
            Ok(done) => done,
            Err(cause) => {
                return self
                    .fail_and_refund(
                        job_id,
                        JobStage::Analyzing,
                        format!("engine_failed: {cause}"),
                        Some(ENGINE_ATTEMPTS),
                    )
                    .await;
            }
        };

        let Some(job) = self
            .apply(
                StageTransition::new(job_id, JobStage::Analyzing, JobStage::Rendering)
                    .with_analysis(analysis.clone())
                    .with_attempts(attempts),
            )
            .await?
        else {
            debug!(
                target = "healthreport::application::orchestrator",
                job_id = %job_id,
                "job left analyzing while the engine ran; dropping analysis"
            );
            return self.current(job_id).await;
        };

        let options = RenderOptions {
            renderer_version: renderer.descriptor.version.clone(),
            engine_id: job.engine_id.clone(),
            subject_label: Some(summary.subject_id.clone()),
        };
        let artifact = match self.render(&renderer, &analysis, &options).await {
            Ok(artifact) => artifact,
            Err(cause) => {
                return self
                    .fail_and_refund(
                        job_id,
                        JobStage::Rendering,
                        format!("renderer_failed: {cause}"),
                        None,
                    )
                    .await;
            }
        };

        let stored = self
            .artifacts
            .insert_artifact(NewArtifact {
                job_id,
                format: artifact.format,
                content_type: artifact.content_type,
                body: artifact.body,
            })
            .await?;

        let Some(completed) = self
            .apply(
                StageTransition::new(job_id, JobStage::Rendering, JobStage::Completed)
                    .with_artifact(stored.id),
            )
            .await?
        else {
            warn!(
                target = "healthreport::application::orchestrator",
                job_id = %job_id,
                artifact_id = %stored.id,
                "job left rendering before completion; artifact discarded"
            );
            return self.current(job_id).await;
        };

        if !tolerate_settled(self.ledger.charge(job_id).await)? {
            debug!(
                target = "healthreport::application::orchestrator",
                job_id = %job_id,
                "reservation already settled by the reaper"
            );
        }
        counter!(METRIC_JOBS_COMPLETED).increment(1);
        info!(
            target = "healthreport::application::orchestrator",
            job_id = %job_id,
            artifact_id = %stored.id,
            "report job completed"
        );
        Ok(completed)
    }

    async fn analyze(
        &self,
        engine: &RegisteredEngine,
        summary: &MeasurementSummary,
    ) -> Result<(AnalysisResult, i32), CapabilityError> {
        let options = AnalysisOptions {
            engine_version: engine.descriptor.version.clone(),
            locale: None,
        };
        let mut last_error = CapabilityError::Transport("engine was not called".to_string());
        for attempt in 1..=ENGINE_ATTEMPTS {
            let started = Instant::now();
            let outcome = tokio::time::timeout(
                engine.descriptor.timeout,
                engine.capability.analyze(summary, &options),
            )
            .await;
            histogram!(METRIC_ENGINE_MS).record(started.elapsed().as_secs_f64() * 1000.0);

            match outcome {
                Ok(Ok(analysis)) => return Ok((analysis, attempt)),
                Ok(Err(err)) => last_error = err,
                Err(_) => {
                    last_error = CapabilityError::Transport(format!(
                        "timed out after {}ms",
                        engine.descriptor.timeout.as_millis()
                    ))
                }
            }
            warn!(
                target = "healthreport::application::orchestrator",
                engine_id = %engine.descriptor.id,
                attempt,
                error = %last_error,
                "engine attempt failed"
            );
        }
        Err(last_error)
    }

    async fn render(
        &self,
        renderer: &RegisteredRenderer,
        analysis: &AnalysisResult,
        options: &RenderOptions,
    ) -> Result<RenderedArtifact, CapabilityError> {
        let started = Instant::now();
        let outcome = tokio::time::timeout(
            renderer.descriptor.timeout,
            renderer.capability.render(analysis, options),
        )
        .await;
        histogram!(METRIC_RENDER_MS).record(started.elapsed().as_secs_f64() * 1000.0);

        match outcome {
            Ok(result) => result,
            Err(_) => Err(CapabilityError::Transport(format!(
                "timed out after {}ms",
                renderer.descriptor.timeout.as_millis()
            ))),
        }
    }

    /// Cancel a job that has not started rendering.
    pub async fn cancel(
        &self,
        ctx: &CallerContext,
        job_id: Uuid,
    ) -> Result<ReportJobRecord, OrchestratorError> {
        let job = self.get_job(ctx, job_id).await?;
        if !job.stage.is_cancellable() {
            return Err(OrchestratorError::InvalidState {
                job_id,
                stage: job.stage,
                action: "cancelled",
            });
        }

        let Some(cancelled) = self
            .apply(
                StageTransition::new(job_id, job.stage, JobStage::Failed)
                    .with_error(ERROR_CANCELLED),
            )
            .await?
        else {
            let current = self.current(job_id).await?;
            return Err(OrchestratorError::InvalidState {
                job_id,
                stage: current.stage,
                action: "cancelled",
            });
        };

        self.refund_if_held(job_id).await?;
        counter!(METRIC_JOBS_FAILED, "reason" => ERROR_CANCELLED).increment(1);
        info!(
            target = "healthreport::application::orchestrator",
            job_id = %job_id,
            requester_id = %ctx.requester_id,
            "report job cancelled"
        );
        Ok(cancelled)
    }

    /// Job owned by the caller's account.
    pub async fn get_job(
        &self,
        ctx: &CallerContext,
        job_id: Uuid,
    ) -> Result<ReportJobRecord, OrchestratorError> {
        let job = self
            .jobs
            .find_job(job_id)
            .await?
            .ok_or(OrchestratorError::NotFound)?;
        if job.account_id != ctx.account_id {
            return Err(OrchestratorError::NotFound);
        }
        Ok(job)
    }

    /// The caller's jobs, newest first.
    pub async fn list_jobs(
        &self,
        ctx: &CallerContext,
        limit: u32,
    ) -> Result<Vec<ReportJobRecord>, OrchestratorError> {
        Ok(self.jobs.list_for_account(&ctx.account_id, limit).await?)
    }

    pub async fn get_artifact(
        &self,
        ctx: &CallerContext,
        job_id: Uuid,
    ) -> Result<ArtifactRecord, OrchestratorError> {
        let job = self.get_job(ctx, job_id).await?;
        let artifact_id = match (job.stage, job.rendered_artifact_id) {
            (JobStage::Completed, Some(id)) => id,
            (stage, _) => {
                return Err(OrchestratorError::InvalidState {
                    job_id,
                    stage,
                    action: "downloaded",
                });
            }
        };
        self.artifacts
            .find_artifact(artifact_id)
            .await?
            .ok_or(OrchestratorError::NotFound)
    }

    /// Fail jobs stuck in a non-terminal stage, then settle reservations
    /// left open by jobs that reached a terminal stage.
    pub async fn reap_stalled(
        &self,
        stalled_after: Duration,
        limit: u32,
    ) -> Result<ReapReport, OrchestratorError> {
        let cutoff = OffsetDateTime::now_utc() - stalled_after;
        let mut report = ReapReport::default();

        for job in self.jobs.list_stalled(cutoff, limit).await? {
            let failed = self
                .apply(
                    StageTransition::new(job.id, job.stage, JobStage::Failed)
                        .with_error(ERROR_STALLED),
                )
                .await?;
            if failed.is_none() {
                continue;
            }
            report.failed_jobs += 1;
            counter!(METRIC_JOBS_FAILED, "reason" => ERROR_STALLED).increment(1);
            warn!(
                target = "healthreport::application::orchestrator",
                job_id = %job.id,
                stage = job.stage.as_str(),
                "stalled job failed"
            );
            if self.ledger.reservation(job.id).await?.is_some_and(|r| r.state.is_open())
                && tolerate_settled(self.ledger.refund(job.id).await)?
            {
                report.refunded += 1;
            }
        }

        for reservation in self.ledger.open_reservations(cutoff, limit).await? {
            let job = self.jobs.find_job(reservation.job_id).await?;
            // A job that moved recently may still have a worker settling it.
            if job.as_ref().is_some_and(|job| job.updated_at >= cutoff) {
                continue;
            }
            match job.map(|job| job.stage) {
                Some(JobStage::Completed) => {
                    if tolerate_settled(self.ledger.charge(reservation.job_id).await)? {
                        report.charged += 1;
                    }
                }
                Some(JobStage::Failed) | None => {
                    if tolerate_settled(self.ledger.refund(reservation.job_id).await)? {
                        report.refunded += 1;
                    }
                }
                Some(_) => {}
            }
        }

        Ok(report)
    }

    async fn apply(
        &self,
        transition: StageTransition,
    ) -> Result<Option<ReportJobRecord>, OrchestratorError> {
        transition.from.ensure_transition(transition.to)?;
        Ok(self.jobs.transition(transition).await?)
    }

    async fn current(&self, job_id: Uuid) -> Result<ReportJobRecord, OrchestratorError> {
        self.jobs
            .find_job(job_id)
            .await?
            .ok_or(OrchestratorError::NotFound)
    }

    /// Move to `failed` without touching credit.
    async fn record_failure(
        &self,
        job_id: Uuid,
        from: JobStage,
        error_info: &str,
    ) -> Result<(), OrchestratorError> {
        self.apply(StageTransition::new(job_id, from, JobStage::Failed).with_error(error_info))
            .await?;
        counter!(METRIC_JOBS_FAILED, "reason" => error_info.to_string()).increment(1);
        Ok(())
    }

    async fn fail_and_refund(
        &self,
        job_id: Uuid,
        from: JobStage,
        error_info: String,
        attempts: Option<i32>,
    ) -> Result<ReportJobRecord, OrchestratorError> {
        let mut transition =
            StageTransition::new(job_id, from, JobStage::Failed).with_error(error_info.clone());
        if let Some(attempts) = attempts {
            transition = transition.with_attempts(attempts);
        }

        let Some(failed) = self.apply(transition).await? else {
            return self.current(job_id).await;
        };
        self.refund_if_held(job_id).await?;
        counter!(METRIC_JOBS_FAILED, "reason" => from.as_str()).increment(1);
        warn!(
            target = "healthreport::application::orchestrator",
            job_id = %job_id,
            stage = from.as_str(),
            error_info = %error_info,
            "report job failed"
        );
        Ok(failed)
    }

    async fn refund_if_held(&self, job_id: Uuid) -> Result<(), OrchestratorError> {
        match self.ledger.reservation(job_id).await? {
            Some(reservation) if reservation.state.is_open() => {
                self.ledger.refund(job_id).await?;
            }
            _ => {}
        }
        Ok(())
    }
}

/// A concurrent settlement of the same reservation is not a sweep failure.
fn tolerate_settled<T>(result: Result<T, LedgerError>) -> Result<bool, OrchestratorError> {
    match result {
        Ok(_) => Ok(true),
        Err(LedgerError::Consistency { .. }) => Ok(false),
        Err(err) => Err(err.into()),
    }
}
