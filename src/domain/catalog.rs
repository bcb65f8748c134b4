//! Engine and renderer descriptors held by the registry.
//!
//! Descriptors are immutable once registered for a given `(id, version)`.
//! Retirement happens by registering with `active = false`, never by removal,
//! so jobs that reference an old version can still be explained.

use std::collections::BTreeSet;
use std::time::Duration;

use serde::Serialize;
use url::Url;

use crate::domain::types::{AccessControl, DataType, OutputFormat};

/// Compatibility tag accepted by renderers that work with any engine.
pub const WILDCARD_ENGINE: &str = "*";

/// How an engine is reached at runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EngineBackend {
    /// JSON-over-HTTP analysis service.
    Http { endpoint: Url },
}

/// How a renderer is reached at runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RendererBackend {
    /// In-process HTML template.
    Html,
    /// JSON-over-HTTP rendering service returning the artifact body.
    Http { endpoint: Url },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineDescriptor {
    pub id: String,
    pub version: String,
    pub name: String,
    pub cost_per_analysis: i64,
    pub supported_data_types: BTreeSet<DataType>,
    pub quality_threshold: u8,
    #[serde(with = "duration_millis")]
    pub timeout: Duration,
    pub active: bool,
    pub backend: EngineBackend,
}

impl EngineDescriptor {
    pub fn supports_any(&self, data_types: &BTreeSet<DataType>) -> bool {
        data_types
            .iter()
            .any(|data_type| self.supported_data_types.contains(data_type))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RendererDescriptor {
    pub id: String,
    pub version: String,
    pub name: String,
    pub output_format: OutputFormat,
    pub cost_per_render: i64,
    pub compatible_engine_ids: BTreeSet<String>,
    pub access_control: AccessControl,
    #[serde(with = "duration_millis")]
    pub timeout: Duration,
    pub active: bool,
    pub backend: RendererBackend,
}

impl RendererDescriptor {
    /// True when the renderer declares the engine id or the wildcard tag.
    pub fn supports_engine(&self, engine_id: &str) -> bool {
        self.compatible_engine_ids.contains(engine_id)
            || self.compatible_engine_ids.contains(WILDCARD_ENGINE)
    }
}

mod duration_millis {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let millis = u64::try_from(value.as_millis()).unwrap_or(u64::MAX);
        serializer.serialize_u64(millis)
    }
}
