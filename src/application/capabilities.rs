//! Contracts for the pluggable analysis engines and report renderers.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::measurement::{
    AnalysisResult, MeasurementSummary, RenderedArtifact, SummaryValidation,
};

#[derive(Debug, Clone, Error)]
pub enum CapabilityError {
    #[error("upstream unreachable: {0}")]
    Transport(String),
    #[error("upstream rejected the request: {0}")]
    Rejected(String),
    #[error("upstream returned an unusable response: {0}")]
    InvalidResponse(String),
}

/// Per-call options forwarded to engines.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalysisOptions {
    pub engine_version: String,
    #[serde(default)]
    pub locale: Option<String>,
}

/// Per-call options forwarded to renderers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RenderOptions {
    pub renderer_version: String,
    pub engine_id: String,
    pub subject_label: Option<String>,
}

#[async_trait]
pub trait AnalysisEngine: Send + Sync {
    async fn validate(
        &self,
        summary: &MeasurementSummary,
    ) -> Result<SummaryValidation, CapabilityError>;

    async fn analyze(
        &self,
        summary: &MeasurementSummary,
        options: &AnalysisOptions,
    ) -> Result<AnalysisResult, CapabilityError>;
}

#[async_trait]
pub trait ReportRenderer: Send + Sync {
    async fn render(
        &self,
        analysis: &AnalysisResult,
        options: &RenderOptions,
    ) -> Result<RenderedArtifact, CapabilityError>;
}
