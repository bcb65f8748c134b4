//! TOML catalog of installed engines and renderers.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use url::Url;

use crate::application::capabilities::{AnalysisEngine, ReportRenderer};
use crate::application::registry::{Registry, RegistryError};
use crate::domain::catalog::{
    EngineBackend, EngineDescriptor, RendererBackend, RendererDescriptor,
};
use crate::domain::types::{AccessControl, DataType, OutputFormat};
use crate::infra::capabilities::{HtmlReportRenderer, HttpAnalysisEngine, HttpReportRenderer};
use crate::infra::error::InfraError;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to parse catalog: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("{entry}: {reason}")]
    Invalid { entry: String, reason: String },
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl CatalogError {
    fn invalid(entry: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            entry: entry.into(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawCatalog {
    #[serde(default)]
    recommended: Vec<String>,
    #[serde(default)]
    engines: Vec<RawEngine>,
    #[serde(default)]
    renderers: Vec<RawRenderer>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawEngine {
    id: String,
    version: String,
    name: Option<String>,
    cost_per_analysis: i64,
    supported_data_types: BTreeSet<DataType>,
    quality_threshold: u8,
    timeout_ms: u64,
    #[serde(default = "default_active")]
    active: bool,
    backend: RawBackend,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawRenderer {
    id: String,
    version: String,
    name: Option<String>,
    output_format: OutputFormat,
    cost_per_render: i64,
    compatible_engine_ids: BTreeSet<String>,
    #[serde(default = "default_access_control")]
    access_control: AccessControl,
    timeout_ms: u64,
    #[serde(default = "default_active")]
    active: bool,
    backend: RawBackend,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum RawBackend {
    Http { endpoint: Url },
    Html,
}

fn default_active() -> bool {
    true
}

fn default_access_control() -> AccessControl {
    AccessControl::Public
}

/// Read the catalog file and build a populated registry.
pub fn load_registry(path: &Path) -> Result<Registry, InfraError> {
    let data = std::fs::read_to_string(path).map_err(InfraError::Io)?;
    parse_registry(&data).map_err(|err| InfraError::catalog(path, err.to_string()))
}

pub fn parse_registry(data: &str) -> Result<Registry, CatalogError> {
    let raw: RawCatalog = toml::from_str(data)?;
    let mut registry = Registry::new();

    for engine in raw.engines {
        let (descriptor, capability) = build_engine(engine)?;
        registry.register_engine(descriptor, capability)?;
    }
    for renderer in raw.renderers {
        let (descriptor, capability) = build_renderer(renderer)?;
        registry.register_renderer(descriptor, capability)?;
    }

    let known: BTreeSet<String> = registry
        .list_renderers()
        .into_iter()
        .map(|renderer| renderer.id)
        .collect();
    if let Some(unknown) = raw.recommended.iter().find(|id| !known.contains(*id)) {
        return Err(CatalogError::invalid(
            "recommended",
            format!("renderer `{unknown}` is not in the catalog"),
        ));
    }
    registry.set_recommended(raw.recommended);

    Ok(registry)
}

fn check_common(
    entry: &str,
    id: &str,
    version: &str,
    cost: i64,
    timeout_ms: u64,
) -> Result<(), CatalogError> {
    if id.trim().is_empty() || version.trim().is_empty() {
        return Err(CatalogError::invalid(entry, "id and version are required"));
    }
    if cost < 0 {
        return Err(CatalogError::invalid(entry, "cost must not be negative"));
    }
    if timeout_ms == 0 {
        return Err(CatalogError::invalid(entry, "timeout_ms must be positive"));
    }
    Ok(())
}

fn build_engine(
    raw: RawEngine,
) -> Result<(EngineDescriptor, Arc<dyn AnalysisEngine>), CatalogError> {
    let entry = format!("engine `{}@{}`", raw.id, raw.version);
    check_common(
        &entry,
        &raw.id,
        &raw.version,
        raw.cost_per_analysis,
        raw.timeout_ms,
    )?;
    if raw.supported_data_types.is_empty() {
        return Err(CatalogError::invalid(
            &entry,
            "supported_data_types must not be empty",
        ));
    }
    if raw.quality_threshold > 100 {
        return Err(CatalogError::invalid(
            &entry,
            "quality_threshold must be within 0..=100",
        ));
    }

    let (backend, capability): (EngineBackend, Arc<dyn AnalysisEngine>) = match raw.backend {
        RawBackend::Http { endpoint } => (
            EngineBackend::Http {
                endpoint: endpoint.clone(),
            },
            Arc::new(HttpAnalysisEngine::new(endpoint)),
        ),
        RawBackend::Html => {
            return Err(CatalogError::invalid(
                &entry,
                "engines only support the `http` backend",
            ));
        }
    };

    let descriptor = EngineDescriptor {
        name: raw.name.unwrap_or_else(|| raw.id.clone()),
        id: raw.id,
        version: raw.version,
        cost_per_analysis: raw.cost_per_analysis,
        supported_data_types: raw.supported_data_types,
        quality_threshold: raw.quality_threshold,
        timeout: Duration::from_millis(raw.timeout_ms),
        active: raw.active,
        backend,
    };
    Ok((descriptor, capability))
}

fn build_renderer(
    raw: RawRenderer,
) -> Result<(RendererDescriptor, Arc<dyn ReportRenderer>), CatalogError> {
    let entry = format!("renderer `{}@{}`", raw.id, raw.version);
    check_common(
        &entry,
        &raw.id,
        &raw.version,
        raw.cost_per_render,
        raw.timeout_ms,
    )?;
    if raw.compatible_engine_ids.is_empty() {
        return Err(CatalogError::invalid(
            &entry,
            "compatible_engine_ids must not be empty",
        ));
    }

    let (backend, capability): (RendererBackend, Arc<dyn ReportRenderer>) = match raw.backend {
        RawBackend::Html if raw.output_format == OutputFormat::Web => {
            (RendererBackend::Html, Arc::new(HtmlReportRenderer::new()))
        }
        RawBackend::Html => {
            return Err(CatalogError::invalid(
                &entry,
                "the `html` backend only produces the `web` format",
            ));
        }
        RawBackend::Http { endpoint } => (
            RendererBackend::Http {
                endpoint: endpoint.clone(),
            },
            Arc::new(HttpReportRenderer::new(endpoint, raw.output_format)),
        ),
    };

    let descriptor = RendererDescriptor {
        name: raw.name.unwrap_or_else(|| raw.id.clone()),
        id: raw.id,
        version: raw.version,
        output_format: raw.output_format,
        cost_per_render: raw.cost_per_render,
        compatible_engine_ids: raw.compatible_engine_ids,
        access_control: raw.access_control,
        timeout: Duration::from_millis(raw.timeout_ms),
        active: raw.active,
        backend,
    };
    Ok((descriptor, capability))
}
