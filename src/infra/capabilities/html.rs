use askama::Template;
use async_trait::async_trait;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

use crate::application::capabilities::{CapabilityError, RenderOptions, ReportRenderer};
use crate::domain::measurement::{AnalysisResult, AnalysisSection, RenderedArtifact};
use crate::domain::types::OutputFormat;

#[derive(Template)]
#[template(path = "report.html")]
struct ReportTemplate<'a> {
    headline: &'a str,
    sections: &'a [AnalysisSection],
    subject_label: Option<&'a str>,
    engine_id: &'a str,
    renderer_version: &'a str,
    generated_at: String,
}

/// Built-in renderer producing a standalone HTML page.
#[derive(Debug, Clone, Default)]
pub struct HtmlReportRenderer;

impl HtmlReportRenderer {
    pub fn new() -> Self {
        Self
    }

    fn render_page(
        &self,
        analysis: &AnalysisResult,
        options: &RenderOptions,
        generated_at: OffsetDateTime,
    ) -> Result<String, CapabilityError> {
        let generated_at = generated_at
            .format(&Rfc3339)
            .map_err(|err| CapabilityError::InvalidResponse(err.to_string()))?;
        ReportTemplate {
            headline: &analysis.headline,
            sections: &analysis.sections,
            subject_label: options.subject_label.as_deref(),
            engine_id: &options.engine_id,
            renderer_version: &options.renderer_version,
            generated_at,
        }
        .render()
        .map_err(|err| CapabilityError::InvalidResponse(format!("template failed: {err}")))
    }
}

#[async_trait]
impl ReportRenderer for HtmlReportRenderer {
    async fn render(
        &self,
        analysis: &AnalysisResult,
        options: &RenderOptions,
    ) -> Result<RenderedArtifact, CapabilityError> {
        let page = self.render_page(analysis, options, OffsetDateTime::now_utc())?;
        Ok(RenderedArtifact {
            format: OutputFormat::Web,
            content_type: OutputFormat::Web.content_type().to_string(),
            body: page.into_bytes(),
        })
    }
}
