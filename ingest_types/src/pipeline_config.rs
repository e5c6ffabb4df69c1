//! The persisted form of pipeline definitions, as replicated through cluster state.

use std::sync::Arc;

use bytes::Bytes;
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to parse source of pipeline [{id}]: {source}")]
    Parse {
        id: String,
        source: serde_json::Error,
    },

    #[error("source of pipeline [{id}] is not a JSON object")]
    NotAnObject { id: String },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MediaType {
    #[default]
    Json,
}

/// A pipeline definition as stored: the id plus the raw source it was submitted with.
///
/// Two configurations are equal only when their sources are byte-for-byte equal, which is what
/// lets the registry skip recompiling unchanged pipelines.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PipelineConfiguration {
    pub id: String,
    pub source: Bytes,
    pub media_type: MediaType,
}

impl PipelineConfiguration {
    pub fn new(id: impl Into<String>, source: impl Into<Bytes>) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            media_type: MediaType::Json,
        }
    }

    /// Convenience for building a configuration from an in-memory JSON value.
    pub fn from_json(id: impl Into<String>, source: &Value) -> Self {
        Self::new(id, source.to_string())
    }

    /// Parse the source into the configuration map pipelines are created from.
    pub fn config_as_map(&self) -> Result<Map<String, Value>> {
        let value: Value = match self.media_type {
            MediaType::Json => {
                serde_json::from_slice(&self.source).map_err(|source| Error::Parse {
                    id: self.id.clone(),
                    source,
                })?
            }
        };
        match value {
            Value::Object(map) => Ok(map),
            _ => Err(Error::NotAnObject {
                id: self.id.clone(),
            }),
        }
    }
}

/// The ingest section of cluster metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestMetadata {
    pub pipelines: HashMap<String, Arc<PipelineConfiguration>>,
}

impl IngestMetadata {
    pub fn with_pipeline(mut self, config: PipelineConfiguration) -> Self {
        self.pipelines.insert(config.id.clone(), Arc::new(config));
        self
    }

    pub fn get(&self, id: &str) -> Option<&Arc<PipelineConfiguration>> {
        self.pipelines.get(id)
    }
}
