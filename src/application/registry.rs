//! Installed engines and renderers, and the compatibility matcher over them.
//!
//! The registry is populated once at startup from the catalog and is read-only
//! afterwards, so lookups take `&self` without any locking.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use thiserror::Error;

use crate::application::capabilities::{AnalysisEngine, ReportRenderer};
use crate::domain::catalog::{EngineDescriptor, RendererDescriptor};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("engine `{id}` version `{version}` is already registered")]
    DuplicateEngine { id: String, version: String },
    #[error("renderer `{id}` version `{version}` is already registered")]
    DuplicateRenderer { id: String, version: String },
    #[error("unknown or inactive engine `{0}`")]
    UnknownEngine(String),
    #[error("unknown or inactive renderer `{0}`")]
    UnknownRenderer(String),
    #[error("renderer `{renderer}` does not support engine `{engine}`")]
    Incompatible { engine: String, renderer: String },
}

#[derive(Clone)]
pub struct RegisteredEngine {
    pub descriptor: EngineDescriptor,
    pub capability: Arc<dyn AnalysisEngine>,
}

#[derive(Clone)]
pub struct RegisteredRenderer {
    pub descriptor: RendererDescriptor,
    pub capability: Arc<dyn ReportRenderer>,
}

#[derive(Default)]
pub struct Registry {
    engines: Vec<RegisteredEngine>,
    renderers: Vec<RegisteredRenderer>,
    recommended: BTreeSet<String>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark renderer ids that `find_compatible` should list first.
    pub fn set_recommended<I, S>(&mut self, ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.recommended = ids.into_iter().map(Into::into).collect();
    }

    pub fn is_recommended(&self, renderer_id: &str) -> bool {
        self.recommended.contains(renderer_id)
    }

    pub fn register_engine(
        &mut self,
        descriptor: EngineDescriptor,
        capability: Arc<dyn AnalysisEngine>,
    ) -> Result<(), RegistryError> {
        let duplicate = self.engines.iter().any(|existing| {
            existing.descriptor.id == descriptor.id
                && existing.descriptor.version == descriptor.version
        });
        if duplicate {
            return Err(RegistryError::DuplicateEngine {
                id: descriptor.id,
                version: descriptor.version,
            });
        }
        self.engines.push(RegisteredEngine {
            descriptor,
            capability,
        });
        Ok(())
    }

    pub fn register_renderer(
        &mut self,
        descriptor: RendererDescriptor,
        capability: Arc<dyn ReportRenderer>,
    ) -> Result<(), RegistryError> {
        let duplicate = self.renderers.iter().any(|existing| {
            existing.descriptor.id == descriptor.id
                && existing.descriptor.version == descriptor.version
        });
        if duplicate {
            return Err(RegistryError::DuplicateRenderer {
                id: descriptor.id,
                version: descriptor.version,
            });
        }
        self.renderers.push(RegisteredRenderer {
            descriptor,
            capability,
        });
        Ok(())
    }

    /// Every registered engine version, including retired ones.
    pub fn list_engines(&self) -> Vec<EngineDescriptor> {
        let mut engines: Vec<_> = self
            .engines
            .iter()
            .map(|engine| engine.descriptor.clone())
            .collect();
        engines.sort_by(|a, b| a.id.cmp(&b.id).then(compare_versions(&a.version, &b.version)));
        engines
    }

    /// Every registered renderer version, including retired ones.
    pub fn list_renderers(&self) -> Vec<RendererDescriptor> {
        let mut renderers: Vec<_> = self
            .renderers
            .iter()
            .map(|renderer| renderer.descriptor.clone())
            .collect();
        renderers.sort_by(|a, b| a.id.cmp(&b.id).then(compare_versions(&a.version, &b.version)));
        renderers
    }

    /// Latest active version of an engine.
    pub fn engine(&self, id: &str) -> Option<&RegisteredEngine> {
        self.engines
            .iter()
            .filter(|engine| engine.descriptor.active && engine.descriptor.id == id)
            .max_by(|a, b| compare_versions(&a.descriptor.version, &b.descriptor.version))
    }

    /// Latest active version of a renderer.
    pub fn renderer(&self, id: &str) -> Option<&RegisteredRenderer> {
        self.renderers
            .iter()
            .filter(|renderer| renderer.descriptor.active && renderer.descriptor.id == id)
            .max_by(|a, b| compare_versions(&a.descriptor.version, &b.descriptor.version))
    }

    /// Exact engine version recorded on a job, active or not.
    pub fn engine_version(&self, id: &str, version: &str) -> Option<&RegisteredEngine> {
        self.engines
            .iter()
            .find(|engine| engine.descriptor.id == id && engine.descriptor.version == version)
    }

    /// Exact renderer version recorded on a job, active or not.
    pub fn renderer_version(&self, id: &str, version: &str) -> Option<&RegisteredRenderer> {
        self.renderers.iter().find(|renderer| {
            renderer.descriptor.id == id && renderer.descriptor.version == version
        })
    }

    /// Renderers usable with `engine_id`: recommended first, then cheapest, then by id.
    ///
    /// An unknown engine yields an empty list; callers decide whether that is fatal.
    pub fn find_compatible(&self, engine_id: &str) -> Vec<RendererDescriptor> {
        if self.engine(engine_id).is_none() {
            return Vec::new();
        }

        let mut latest: BTreeMap<&str, &RendererDescriptor> = BTreeMap::new();
        for renderer in &self.renderers {
            let descriptor = &renderer.descriptor;
            if !descriptor.active {
                continue;
            }
            latest
                .entry(descriptor.id.as_str())
                .and_modify(|current| {
                    if compare_versions(&descriptor.version, &current.version) == Ordering::Greater
                    {
                        *current = descriptor;
                    }
                })
                .or_insert(descriptor);
        }
        // Compatibility is judged on the version `resolve_pair` would pick.
        latest.retain(|_, descriptor| descriptor.supports_engine(engine_id));

        let mut compatible: Vec<RendererDescriptor> = latest.into_values().cloned().collect();
        compatible.sort_by(|a, b| {
            let a_rank = !self.is_recommended(&a.id);
            let b_rank = !self.is_recommended(&b.id);
            a_rank
                .cmp(&b_rank)
                .then(a.cost_per_render.cmp(&b.cost_per_render))
                .then_with(|| a.id.cmp(&b.id))
        });
        compatible
    }

    /// Resolve an engine/renderer pair for a new job.
    pub fn resolve_pair(
        &self,
        engine_id: &str,
        renderer_id: &str,
    ) -> Result<(RegisteredEngine, RegisteredRenderer), RegistryError> {
        let engine = self
            .engine(engine_id)
            .ok_or_else(|| RegistryError::UnknownEngine(engine_id.to_string()))?;
        let renderer = self
            .renderer(renderer_id)
            .ok_or_else(|| RegistryError::UnknownRenderer(renderer_id.to_string()))?;
        if !renderer.descriptor.supports_engine(engine_id) {
            return Err(RegistryError::Incompatible {
                engine: engine_id.to_string(),
                renderer: renderer_id.to_string(),
            });
        }
        Ok((engine.clone(), renderer.clone()))
    }
}

/// Order dotted version strings numerically where possible.
fn compare_versions(a: &str, b: &str) -> Ordering {
    let mut left = a.split('.');
    let mut right = b.split('.');
    loop {
        match (left.next(), right.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) => {
                let ordering = match (x.parse::<u64>(), y.parse::<u64>()) {
                    (Ok(x), Ok(y)) => x.cmp(&y),
                    _ => x.cmp(y),
                };
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::application::capabilities::{AnalysisOptions, CapabilityError, RenderOptions};
    use crate::domain::catalog::{EngineBackend, RendererBackend};
    use crate::domain::measurement::{
        AnalysisResult, MeasurementSummary, RenderedArtifact, SummaryValidation,
    };
    use crate::domain::types::{AccessControl, DataType, OutputFormat};

    struct NoopEngine;

    #[async_trait]
    impl AnalysisEngine for NoopEngine {
        async fn validate(
            &self,
            summary: &MeasurementSummary,
        ) -> Result<SummaryValidation, CapabilityError> {
            Ok(SummaryValidation {
                is_valid: true,
                errors: Vec::new(),
                quality_score: summary.quality_score,
            })
        }

        async fn analyze(
            &self,
            _summary: &MeasurementSummary,
            _options: &AnalysisOptions,
        ) -> Result<AnalysisResult, CapabilityError> {
            unreachable!("not used in these tests")
        }
    }

    struct NoopRenderer;

    #[async_trait]
    impl ReportRenderer for NoopRenderer {
        async fn render(
            &self,
            _analysis: &AnalysisResult,
            _options: &RenderOptions,
        ) -> Result<RenderedArtifact, CapabilityError> {
            unreachable!("not used in these tests")
        }
    }

    fn engine(id: &str, version: &str) -> EngineDescriptor {
        EngineDescriptor {
            id: id.into(),
            version: version.into(),
            name: id.into(),
            cost_per_analysis: 5,
            supported_data_types: BTreeSet::from([DataType::Eeg]),
            quality_threshold: 60,
            timeout: Duration::from_secs(5),
            active: true,
            backend: EngineBackend::Http {
                endpoint: "http://engine.invalid/analyze".parse().expect("url"),
            },
        }
    }

    fn renderer(id: &str, version: &str, cost: i64, engines: &[&str]) -> RendererDescriptor {
        RendererDescriptor {
            id: id.into(),
            version: version.into(),
            name: id.into(),
            output_format: OutputFormat::Web,
            cost_per_render: cost,
            compatible_engine_ids: engines.iter().map(|e| e.to_string()).collect(),
            access_control: AccessControl::Public,
            timeout: Duration::from_secs(5),
            active: true,
            backend: RendererBackend::Html,
        }
    }

    fn registry_with(renderers: Vec<RendererDescriptor>) -> Registry {
        let mut registry = Registry::new();
        registry
            .register_engine(engine("engine-x", "1.0.0"), Arc::new(NoopEngine))
            .expect("engine registers");
        registry
            .register_engine(engine("engine-y", "1.0.0"), Arc::new(NoopEngine))
            .expect("engine registers");
        for descriptor in renderers {
            registry
                .register_renderer(descriptor, Arc::new(NoopRenderer))
                .expect("renderer registers");
        }
        registry
    }

    fn ids(renderers: &[RendererDescriptor]) -> Vec<&str> {
        renderers.iter().map(|r| r.id.as_str()).collect()
    }

    #[test]
    fn wildcard_and_explicit_renderers_match() {
        let registry = registry_with(vec![
            renderer("R1", "1", 2, &["engine-x"]),
            renderer("R2", "1", 2, &["*"]),
            renderer("R3", "1", 2, &["engine-y"]),
        ]);

        assert_eq!(ids(&registry.find_compatible("engine-x")), vec!["R1", "R2"]);
    }

    #[test]
    fn unknown_engine_yields_empty_list() {
        let registry = registry_with(vec![renderer("R2", "1", 2, &["*"])]);
        assert!(registry.find_compatible("engine-z").is_empty());
    }

    #[test]
    fn recommended_first_then_cost_then_id() {
        let mut registry = registry_with(vec![
            renderer("cheap", "1", 1, &["*"]),
            renderer("b-mid", "1", 3, &["*"]),
            renderer("a-mid", "1", 3, &["*"]),
            renderer("premium", "1", 9, &["engine-x"]),
        ]);
        registry.set_recommended(["premium"]);

        let first = registry.find_compatible("engine-x");
        assert_eq!(ids(&first), vec!["premium", "cheap", "a-mid", "b-mid"]);
        assert_eq!(registry.find_compatible("engine-x"), first);
    }

    #[test]
    fn versions_collapse_to_latest_active() {
        let mut retired = renderer("R1", "2.0.0", 4, &["engine-x"]);
        retired.active = false;
        let registry = registry_with(vec![
            renderer("R1", "1.2.0", 2, &["engine-x"]),
            renderer("R1", "1.10.0", 3, &["engine-x"]),
            retired,
        ]);

        let compatible = registry.find_compatible("engine-x");
        assert_eq!(compatible.len(), 1);
        assert_eq!(compatible[0].version, "1.10.0");
        assert_eq!(registry.list_renderers().len(), 3);
    }

    #[test]
    fn renderer_that_dropped_an_engine_is_not_offered() {
        let registry = registry_with(vec![
            renderer("R1", "1.0.0", 2, &["engine-x"]),
            renderer("R1", "2.0.0", 2, &["engine-y"]),
        ]);

        assert!(registry.find_compatible("engine-x").is_empty());
        assert!(matches!(
            registry.resolve_pair("engine-x", "R1").err(),
            Some(RegistryError::Incompatible { .. })
        ));

        let offered = registry.find_compatible("engine-y");
        assert_eq!(ids(&offered), vec!["R1"]);
        assert_eq!(offered[0].version, "2.0.0");
        assert!(registry.resolve_pair("engine-y", "R1").is_ok());
    }

    #[test]
    fn duplicate_version_is_rejected() {
        let mut registry = registry_with(Vec::new());
        let err = registry
            .register_engine(engine("engine-x", "1.0.0"), Arc::new(NoopEngine))
            .expect_err("duplicate rejected");
        assert!(matches!(err, RegistryError::DuplicateEngine { .. }));
    }

    #[test]
    fn resolve_pair_rejects_incompatible_renderer() {
        let registry = registry_with(vec![renderer("R3", "1", 2, &["engine-y"])]);
        let err = registry
            .resolve_pair("engine-x", "R3")
            .err()
            .expect("incompatible");
        assert_eq!(
            err,
            RegistryError::Incompatible {
                engine: "engine-x".into(),
                renderer: "R3".into()
            }
        );
        assert!(matches!(
            registry.resolve_pair("engine-x", "missing").err(),
            Some(RegistryError::UnknownRenderer(_))
        ));
    }
}
