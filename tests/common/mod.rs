//! Shared fixtures: scripted capabilities and an in-memory service graph.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use url::Url;
use uuid::Uuid;

use healthreport::application::capabilities::{
    AnalysisEngine, AnalysisOptions, CapabilityError, RenderOptions, ReportRenderer,
};
use healthreport::application::jobs::{DispatchError, JobDispatcher};
use healthreport::application::ledger::CreditLedger;
use healthreport::application::orchestrator::{
    CallerContext, ReportOrchestrator, SubmitReportCommand,
};
use healthreport::application::registry::Registry;
use healthreport::application::share_links::{ShareLinkPolicy, ShareLinkService};
use healthreport::domain::catalog::{
    EngineBackend, EngineDescriptor, RendererBackend, RendererDescriptor,
};
use healthreport::domain::measurement::{
    AnalysisFinding, AnalysisResult, AnalysisSection, MeasurementSummary, RenderedArtifact,
    SummaryValidation,
};
use healthreport::domain::types::{AccessControl, DataType, OutputFormat};
use healthreport::infra::capabilities::HtmlReportRenderer;
use healthreport::infra::memory::MemoryRepositories;

pub const ENGINE: &str = "eeg-stress";
pub const WEB_RENDERER: &str = "stress-web";
pub const FLAKY_RENDERER: &str = "flaky-json";
pub const ORG_RENDERER: &str = "clinic-pdf";
pub const ENGINE_COST: i64 = 5;
pub const RENDER_COST: i64 = 2;
pub const ENGINE_TIMEOUT: Duration = Duration::from_millis(100);
pub const RENDER_TIMEOUT: Duration = Duration::from_millis(200);

/// Engine whose analyze calls fail a scripted number of times before succeeding.
#[derive(Default)]
pub struct ScriptedEngine {
    pub failures_left: AtomicUsize,
    pub hangs_left: AtomicUsize,
    pub reject: AtomicBool,
    pub analyze_calls: AtomicUsize,
    pub validate_calls: AtomicUsize,
}

impl ScriptedEngine {
    pub fn fail_next(&self, times: usize) {
        self.failures_left.store(times, Ordering::SeqCst);
    }

    /// Make the next `times` analyze calls outlive the engine timeout.
    pub fn hang_next(&self, times: usize) {
        self.hangs_left.store(times, Ordering::SeqCst);
    }
}

#[async_trait]
impl AnalysisEngine for ScriptedEngine {
    async fn validate(
        &self,
        summary: &MeasurementSummary,
    ) -> Result<SummaryValidation, CapabilityError> {
        self.validate_calls.fetch_add(1, Ordering::SeqCst);
        let rejected = self.reject.load(Ordering::SeqCst);
        Ok(SummaryValidation {
            is_valid: !rejected,
            errors: if rejected {
                vec!["eeg channel count too low".to_string()]
            } else {
                Vec::new()
            },
            quality_score: summary.quality_score,
        })
    }

    async fn analyze(
        &self,
        summary: &MeasurementSummary,
        _options: &AnalysisOptions,
    ) -> Result<AnalysisResult, CapabilityError> {
        self.analyze_calls.fetch_add(1, Ordering::SeqCst);
        if take_one(&self.hangs_left) {
            tokio::time::sleep(ENGINE_TIMEOUT * 10).await;
        }
        if take_one(&self.failures_left) {
            return Err(CapabilityError::Transport("connection reset".to_string()));
        }
        Ok(analysis_for(summary))
    }
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
        .is_ok()
}

/// Renderer that can be told to fail or stall every call.
#[derive(Default)]
pub struct ScriptedRenderer {
    pub fail: AtomicBool,
    pub hang: AtomicBool,
    pub calls: AtomicUsize,
}

#[async_trait]
impl ReportRenderer for ScriptedRenderer {
    async fn render(
        &self,
        analysis: &AnalysisResult,
        _options: &RenderOptions,
    ) -> Result<RenderedArtifact, CapabilityError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.hang.load(Ordering::SeqCst) {
            tokio::time::sleep(RENDER_TIMEOUT * 10).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(CapabilityError::Rejected("template crashed".to_string()));
        }
        let body = serde_json::to_vec(analysis)
            .map_err(|err| CapabilityError::InvalidResponse(err.to_string()))?;
        Ok(RenderedArtifact {
            format: OutputFormat::Json,
            content_type: OutputFormat::Json.content_type().to_string(),
            body,
        })
    }
}

/// Dispatcher that records job ids; tests drive execution themselves.
#[derive(Default)]
pub struct RecordingDispatcher {
    pub dispatched: Mutex<Vec<Uuid>>,
    pub fail: AtomicBool,
}

#[async_trait]
impl JobDispatcher for RecordingDispatcher {
    async fn dispatch(&self, job_id: Uuid) -> Result<(), DispatchError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(DispatchError("queue unavailable".to_string()));
        }
        self.dispatched.lock().await.push(job_id);
        Ok(())
    }
}

pub struct Harness {
    pub repos: Arc<MemoryRepositories>,
    pub ledger: CreditLedger,
    pub orchestrator: ReportOrchestrator,
    pub share_links: Arc<ShareLinkService>,
    pub dispatcher: Arc<RecordingDispatcher>,
    pub engine: Arc<ScriptedEngine>,
    pub renderer: Arc<ScriptedRenderer>,
}

impl Harness {
    pub fn new() -> Self {
        let repos = Arc::new(MemoryRepositories::new());
        let engine = Arc::new(ScriptedEngine::default());
        let renderer = Arc::new(ScriptedRenderer::default());
        let dispatcher = Arc::new(RecordingDispatcher::default());

        let registry = Arc::new(registry(engine.clone(), renderer.clone()));
        let ledger = CreditLedger::new(repos.clone());
        let orchestrator = ReportOrchestrator::new(
            registry,
            ledger.clone(),
            repos.clone(),
            repos.clone(),
            repos.clone(),
            dispatcher.clone(),
        );
        let share_links = Arc::new(ShareLinkService::new(
            repos.clone(),
            repos.clone(),
            repos.clone(),
            ShareLinkPolicy::default(),
        ));

        repos.insert_summary(summary("session-1", 80));

        Self {
            repos,
            ledger,
            orchestrator,
            share_links,
            dispatcher,
            engine,
            renderer,
        }
    }

    pub async fn funded(balance: i64) -> Self {
        let harness = Self::new();
        harness
            .ledger
            .top_up(&caller().account_id, balance)
            .await
            .expect("top up");
        harness
    }

    pub async fn balance(&self) -> i64 {
        self.ledger
            .balance(&caller().account_id)
            .await
            .expect("balance")
    }

    /// Submit a report on the default session and run it to completion.
    pub async fn submit_and_run(&self, renderer_id: &str) -> Uuid {
        let job = self
            .orchestrator
            .submit(&caller(), submit_command(renderer_id))
            .await
            .expect("submit");
        self.orchestrator.execute(job.id).await.expect("execute");
        job.id
    }
}

pub fn caller() -> CallerContext {
    CallerContext {
        account_id: "acct-1".to_string(),
        organization_id: None,
        requester_id: "dr-ada".to_string(),
    }
}

pub fn org_caller() -> CallerContext {
    CallerContext {
        organization_id: Some("clinic-7".to_string()),
        ..caller()
    }
}

pub fn submit_command(renderer_id: &str) -> SubmitReportCommand {
    SubmitReportCommand {
        session_id: "session-1".to_string(),
        engine_id: ENGINE.to_string(),
        renderer_id: renderer_id.to_string(),
    }
}

pub fn summary(session_id: &str, quality_score: u8) -> MeasurementSummary {
    let mut per_signal_metrics = BTreeMap::new();
    per_signal_metrics.insert(
        DataType::Eeg,
        serde_json::json!({ "alpha_power": 12.5, "channels": 4 }),
    );
    MeasurementSummary {
        session_id: session_id.to_string(),
        subject_id: "subject-9".to_string(),
        quality_score,
        per_signal_metrics,
    }
}

fn analysis_for(summary: &MeasurementSummary) -> AnalysisResult {
    AnalysisResult {
        headline: format!("Stress index for {}", summary.subject_id),
        sections: vec![AnalysisSection {
            title: "Autonomic balance".to_string(),
            findings: vec![AnalysisFinding {
                label: "Stress index".to_string(),
                value: "42".to_string(),
                note: Some("within the usual range".to_string()),
            }],
        }],
        extra: serde_json::Value::Null,
    }
}

fn registry(engine: Arc<ScriptedEngine>, renderer: Arc<ScriptedRenderer>) -> Registry {
    let endpoint = Url::parse("http://engines.test/eeg-stress/").expect("url");
    let mut registry = Registry::new();
    registry
        .register_engine(
            EngineDescriptor {
                id: ENGINE.to_string(),
                version: "1.0.0".to_string(),
                name: "EEG stress".to_string(),
                cost_per_analysis: ENGINE_COST,
                supported_data_types: BTreeSet::from([DataType::Eeg]),
                quality_threshold: 60,
                timeout: ENGINE_TIMEOUT,
                active: true,
                backend: EngineBackend::Http { endpoint },
            },
            engine,
        )
        .expect("engine");
    registry
        .register_renderer(
            renderer_descriptor(WEB_RENDERER, OutputFormat::Web, AccessControl::Public),
            Arc::new(HtmlReportRenderer::new()),
        )
        .expect("web renderer");
    registry
        .register_renderer(
            renderer_descriptor(FLAKY_RENDERER, OutputFormat::Json, AccessControl::Public),
            renderer.clone(),
        )
        .expect("flaky renderer");
    registry
        .register_renderer(
            renderer_descriptor(ORG_RENDERER, OutputFormat::Json, AccessControl::Organization),
            renderer,
        )
        .expect("org renderer");
    registry.set_recommended([WEB_RENDERER]);
    registry
}

fn renderer_descriptor(
    id: &str,
    output_format: OutputFormat,
    access_control: AccessControl,
) -> RendererDescriptor {
    RendererDescriptor {
        id: id.to_string(),
        version: "1.0.0".to_string(),
        name: id.to_string(),
        output_format,
        cost_per_render: RENDER_COST,
        compatible_engine_ids: BTreeSet::from([ENGINE.to_string()]),
        access_control,
        timeout: RENDER_TIMEOUT,
        active: true,
        backend: RendererBackend::Html,
    }
}
