//! JSON-over-HTTP engines and renderers.
//!
//! Engines expose `POST {endpoint}/validate` and `POST {endpoint}/analyze`;
//! renderers expose `POST {endpoint}/render` and answer with the artifact body.

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode, Url, header::CONTENT_TYPE};
use serde::Serialize;

use crate::application::capabilities::{
    AnalysisEngine, AnalysisOptions, CapabilityError, RenderOptions, ReportRenderer,
};
use crate::domain::measurement::{
    AnalysisResult, MeasurementSummary, RenderedArtifact, SummaryValidation,
};
use crate::domain::types::OutputFormat;

fn user_agent() -> &'static str {
    concat!("healthreport/", env!("CARGO_PKG_VERSION"))
}

fn build_client() -> Client {
    Client::builder()
        .user_agent(user_agent())
        .build()
        .unwrap_or_else(|_| Client::new())
}

/// Treat the endpoint as a directory so relative joins keep its path.
fn as_base(mut endpoint: Url) -> Url {
    if !endpoint.path().ends_with('/') {
        let path = format!("{}/", endpoint.path());
        endpoint.set_path(&path);
    }
    endpoint
}

fn join(base: &Url, path: &str) -> Result<Url, CapabilityError> {
    base.join(path)
        .map_err(|err| CapabilityError::Transport(format!("invalid endpoint: {err}")))
}

fn transport(err: reqwest::Error) -> CapabilityError {
    CapabilityError::Transport(err.to_string())
}

async fn ensure_success(response: Response) -> Result<Response, CapabilityError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    if status.is_client_error() && status != StatusCode::TOO_MANY_REQUESTS {
        Err(CapabilityError::Rejected(format!("status {status} body {body}")))
    } else {
        Err(CapabilityError::Transport(format!("status {status} body {body}")))
    }
}

#[derive(Serialize)]
struct AnalyzeRequest<'a> {
    summary: &'a MeasurementSummary,
    options: &'a AnalysisOptions,
}

#[derive(Serialize)]
struct RenderRequest<'a> {
    analysis: &'a AnalysisResult,
    options: &'a RenderOptions,
}

#[derive(Clone)]
pub struct HttpAnalysisEngine {
    client: Client,
    base: Url,
}

impl HttpAnalysisEngine {
    pub fn new(endpoint: Url) -> Self {
        Self::with_client(build_client(), endpoint)
    }

    pub fn with_client(client: Client, endpoint: Url) -> Self {
        Self {
            client,
            base: as_base(endpoint),
        }
    }
}

#[async_trait]
impl AnalysisEngine for HttpAnalysisEngine {
    async fn validate(
        &self,
        summary: &MeasurementSummary,
    ) -> Result<SummaryValidation, CapabilityError> {
        let response = self
            .client
            .post(join(&self.base, "validate")?)
            .json(summary)
            .send()
            .await
            .map_err(transport)?;
        ensure_success(response)
            .await?
            .json::<SummaryValidation>()
            .await
            .map_err(|err| CapabilityError::InvalidResponse(err.to_string()))
    }

    async fn analyze(
        &self,
        summary: &MeasurementSummary,
        options: &AnalysisOptions,
    ) -> Result<AnalysisResult, CapabilityError> {
        let response = self
            .client
            .post(join(&self.base, "analyze")?)
            .json(&AnalyzeRequest { summary, options })
            .send()
            .await
            .map_err(transport)?;
        ensure_success(response)
            .await?
            .json::<AnalysisResult>()
            .await
            .map_err(|err| CapabilityError::InvalidResponse(err.to_string()))
    }
}

#[derive(Clone)]
pub struct HttpReportRenderer {
    client: Client,
    base: Url,
    format: OutputFormat,
}

impl HttpReportRenderer {
    pub fn new(endpoint: Url, format: OutputFormat) -> Self {
        Self {
            client: build_client(),
            base: as_base(endpoint),
            format,
        }
    }
}

#[async_trait]
impl ReportRenderer for HttpReportRenderer {
    async fn render(
        &self,
        analysis: &AnalysisResult,
        options: &RenderOptions,
    ) -> Result<RenderedArtifact, CapabilityError> {
        let response = self
            .client
            .post(join(&self.base, "render")?)
            .json(&RenderRequest { analysis, options })
            .send()
            .await
            .map_err(transport)?;
        let response = ensure_success(response).await?;

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
            .unwrap_or_else(|| self.format.content_type().to_string());
        let body = response.bytes().await.map_err(transport)?;
        if body.is_empty() {
            return Err(CapabilityError::InvalidResponse(
                "renderer returned an empty body".to_string(),
            ));
        }

        Ok(RenderedArtifact {
            format: self.format,
            content_type,
            body: body.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_path_is_kept_when_joining() {
        let base = as_base("http://engines.local/v2/alpha".parse().expect("url"));
        assert_eq!(
            join(&base, "analyze").expect("join").as_str(),
            "http://engines.local/v2/alpha/analyze"
        );
        let base = as_base("http://engines.local/v2/alpha/".parse().expect("url"));
        assert_eq!(
            join(&base, "validate").expect("join").as_str(),
            "http://engines.local/v2/alpha/validate"
        );
    }
}
