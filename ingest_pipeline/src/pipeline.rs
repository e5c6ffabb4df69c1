use std::sync::Arc;
use std::time::Instant;

use ingest_types::IngestDocument;
use serde_json::{Map, Value};

use crate::config::{read_list, read_optional_i64, read_optional_list, read_optional_string, read_processor_configs};
use crate::error::{ConfigurationError, ProcessorError};
use crate::factory::{IndexBasedPipelineConfig, ProcessorRegistry, Result};
use crate::metrics::OperationMetrics;
use crate::processor::{CompoundProcessor, ProcessorNode, ProcessorOutcome};

pub const DESCRIPTION_KEY: &str = "description";
pub const VERSION_KEY: &str = "version";
pub const PROCESSORS_KEY: &str = "processors";
pub const ON_FAILURE_KEY: &str = "on_failure";

const PIPELINE_TYPE: &str = "pipeline";
const INDEX_BASED_SUFFIX: &str = "_index_based_ingest_pipeline";

/// A named processor graph. Immutable apart from its metrics.
#[derive(Debug)]
pub struct Pipeline {
    id: String,
    description: Option<String>,
    version: Option<i64>,
    processor: CompoundProcessor,
    metrics: OperationMetrics,
}

impl Pipeline {
    pub fn new(
        id: impl Into<String>,
        description: Option<String>,
        version: Option<i64>,
        processor: CompoundProcessor,
    ) -> Self {
        Self {
            id: id.into(),
            description,
            version,
            processor,
            metrics: Default::default(),
        }
    }

    /// Build a pipeline from its configuration map, consuming the keys it understands.
    pub fn create(
        id: impl Into<String>,
        mut config: Map<String, Value>,
        registry: &ProcessorRegistry,
    ) -> Result<Self> {
        let id = id.into();
        let ptype = Some(PIPELINE_TYPE);
        let tag = Some(id.as_str());

        let description = read_optional_string(ptype, tag, &mut config, DESCRIPTION_KEY)?;
        let version = read_optional_i64(ptype, tag, &mut config, VERSION_KEY)?;
        let processor_configs = read_list(ptype, tag, &mut config, PROCESSORS_KEY)?;
        let on_failure_configs = read_optional_list(ptype, tag, &mut config, ON_FAILURE_KEY)?;

        let processors = read_processor_configs(registry, processor_configs)?;
        let on_failure = match on_failure_configs {
            Some(configs) if configs.is_empty() => {
                return Err(ConfigurationError::for_property(
                    ptype,
                    tag,
                    Some(ON_FAILURE_KEY),
                    "pipeline on_failure processors list cannot be empty",
                ));
            }
            Some(configs) => read_processor_configs(registry, configs)?,
            None => vec![],
        };

        if !config.is_empty() {
            let unused: Vec<_> = config.keys().map(String::as_str).collect();
            return Err(ConfigurationError::new(format!(
                "pipeline [{id}] doesn't support one or more provided configuration parameters [{}]",
                unused.join(", ")
            )));
        }

        Ok(Self::new(
            id,
            description,
            version,
            CompoundProcessor::new(false, processors, on_failure),
        ))
    }

    /// Synthesize the pipeline for the index identified by `index_key`: every registered
    /// index-based factory is offered `config` and may contribute one processor.
    pub fn create_index_based(
        index_key: &str,
        registry: &ProcessorRegistry,
        config: &IndexBasedPipelineConfig,
    ) -> Result<Self> {
        let mut processors = vec![];
        for factory in registry.index_based_factories() {
            if let Some(processor) = factory.create(config)? {
                processors.push(ProcessorNode::leaf(processor));
            }
        }
        Ok(Self::new(
            format!("{index_key}{INDEX_BASED_SUFFIX}"),
            None,
            None,
            CompoundProcessor::new(false, processors, vec![]),
        ))
    }

    /// A new pipeline with this pipeline's identity whose processors are this pipeline's
    /// followed by `other`'s. Neither input is modified.
    pub fn merge(&self, other: &Self) -> Self {
        Self::new(
            self.id.clone(),
            self.description.clone(),
            self.version,
            self.processor.merge(&other.processor),
        )
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn version(&self) -> Option<i64> {
        self.version
    }

    pub fn compound_processor(&self) -> &CompoundProcessor {
        &self.processor
    }

    /// Top-level processors.
    pub fn processors(&self) -> Vec<Arc<ProcessorNode>> {
        self.processor.processors().map(Arc::clone).collect()
    }

    pub fn on_failure_processors(&self) -> &[Arc<ProcessorNode>] {
        self.processor.on_failure_processors()
    }

    pub fn processor_count(&self) -> usize {
        self.processor.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processor.is_empty()
    }

    pub fn flatten_all_processors(&self) -> Vec<Arc<ProcessorNode>> {
        self.processor.flatten()
    }

    pub fn metrics(&self) -> &OperationMetrics {
        &self.metrics
    }

    pub fn execute(&self, document: &mut IngestDocument) -> Result<ProcessorOutcome, ProcessorError> {
        self.metrics.before();
        let start = Instant::now();
        let result = self.processor.execute(document);
        self.metrics.after(start.elapsed());
        if result.is_err() {
            self.metrics.failed();
        }
        result
    }
}
