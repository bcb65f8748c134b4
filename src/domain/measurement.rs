//! Measurement input and the artifacts derived from it.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::domain::types::{DataType, OutputFormat};

/// Validated session summary produced by the acquisition pipeline.
///
/// The metrics are opaque to this crate; only the quality score and the set
/// of signal families are inspected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementSummary {
    pub session_id: String,
    pub subject_id: String,
    pub quality_score: u8,
    pub per_signal_metrics: BTreeMap<DataType, serde_json::Value>,
}

impl MeasurementSummary {
    pub fn data_types(&self) -> BTreeSet<DataType> {
        self.per_signal_metrics.keys().copied().collect()
    }
}

/// Result of an engine's own input check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryValidation {
    pub is_valid: bool,
    #[serde(default)]
    pub errors: Vec<String>,
    pub quality_score: u8,
}

/// Structured analysis produced by an engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub headline: String,
    #[serde(default)]
    pub sections: Vec<AnalysisSection>,
    #[serde(default)]
    pub extra: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisSection {
    pub title: String,
    #[serde(default)]
    pub findings: Vec<AnalysisFinding>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisFinding {
    pub label: String,
    pub value: String,
    #[serde(default)]
    pub note: Option<String>,
}

/// Deliverable produced by a renderer, before it is persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedArtifact {
    pub format: OutputFormat,
    pub content_type: String,
    pub body: Vec<u8>,
}
