//! The compiled pipelines of this node, kept in step with the pipeline configurations stored in
//! cluster state.
//!
//! Readers take a snapshot of the whole map; an update builds a new map and swaps it in, so a
//! reader never sees a partially applied update and never waits for pipelines to compile.

use std::sync::Arc;

use hashbrown::{HashMap, HashSet};
use ingest_pipeline::{
    CompoundProcessor, ConfigurationError, Pipeline, Processor, ProcessorError, ProcessorNode,
    ProcessorOutcome, ProcessorRegistry,
};
use ingest_types::{IngestDocument, IngestMetadata, PipelineConfiguration};
use observability_deps::tracing::info;
use parking_lot::{Mutex, RwLock};

use crate::error::{Error, Result};

/// Processor type of the placeholder installed for a pipeline that failed to compile, when the
/// failure does not name a processor type.
const UNKNOWN_PROCESSOR_TYPE: &str = "unknown";

/// A pipeline configuration together with the pipeline compiled from it.
#[derive(Debug)]
pub struct PipelineHolder {
    pub configuration: Arc<PipelineConfiguration>,
    pub pipeline: Arc<Pipeline>,
}

pub type PipelineMap = HashMap<String, Arc<PipelineHolder>>;

/// Pipelines that could not be compiled during an update, by id.
#[derive(Debug, thiserror::Error)]
#[error("failed to load pipelines: {}", describe(.errors))]
pub struct UpdatePipelinesError {
    pub errors: Vec<(String, ConfigurationError)>,
}

fn describe(errors: &[(String, ConfigurationError)]) -> String {
    errors
        .iter()
        .map(|(id, e)| format!("[{id}] {e}"))
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug)]
pub struct PipelineRegistry {
    processors: Arc<ProcessorRegistry>,
    pipelines: RwLock<Arc<PipelineMap>>,
    update_lock: Mutex<()>,
}

impl PipelineRegistry {
    pub fn new(processors: Arc<ProcessorRegistry>) -> Self {
        Self {
            processors,
            pipelines: Default::default(),
            update_lock: Default::default(),
        }
    }

    /// The current map of pipelines.
    pub fn snapshot(&self) -> Arc<PipelineMap> {
        Arc::clone(&self.pipelines.read())
    }

    pub fn get(&self, id: &str) -> Option<Arc<PipelineHolder>> {
        self.pipelines.read().get(id).map(Arc::clone)
    }

    pub fn pipeline(&self, id: &str) -> Option<Arc<Pipeline>> {
        self.get(id).map(|holder| Arc::clone(&holder.pipeline))
    }

    pub fn len(&self) -> usize {
        self.pipelines.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pipelines.read().is_empty()
    }

    /// Bring the registry in line with `ingest`.
    ///
    /// Pipelines whose configuration is unchanged are kept as they are. Changed and new
    /// configurations are compiled; a replaced pipeline hands its metrics to its successor. A
    /// configuration that fails to compile is replaced by a pipeline that fails every document
    /// with the compile error, and the error is returned once all configurations have been
    /// processed. Pipelines absent from `ingest` are removed. The map is only swapped when
    /// something changed.
    pub fn update(&self, ingest: &IngestMetadata) -> Result<(), UpdatePipelinesError> {
        let _guard = self.update_lock.lock();
        let current = self.snapshot();
        let mut updated: Option<PipelineMap> = None;
        let mut errors = vec![];

        for (id, configuration) in &ingest.pipelines {
            let previous = current.get(id);
            if previous.is_some_and(|p| p.configuration == *configuration) {
                continue;
            }

            let pipeline = match compile(id, configuration, &self.processors) {
                Ok(pipeline) => {
                    if let Some(previous) = previous {
                        carry_metrics(&previous.pipeline, &pipeline);
                    }
                    info!(pipeline_id = %id, replaced = previous.is_some(), "loaded pipeline");
                    pipeline
                }
                Err(e) => {
                    let poison = poison_pipeline(id, &e);
                    errors.push((id.clone(), e));
                    poison
                }
            };

            updated
                .get_or_insert_with(|| PipelineMap::clone(&current))
                .insert(
                    id.clone(),
                    Arc::new(PipelineHolder {
                        configuration: Arc::clone(configuration),
                        pipeline: Arc::new(pipeline),
                    }),
                );
        }

        for id in current.keys() {
            if ingest.pipelines.contains_key(id) {
                continue;
            }
            updated
                .get_or_insert_with(|| PipelineMap::clone(&current))
                .remove(id);
            info!(pipeline_id = %id, "removed pipeline");
        }

        if let Some(updated) = updated {
            *self.pipelines.write() = Arc::new(updated);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            errors.sort_by(|(a, _), (b, _)| a.cmp(b));
            Err(UpdatePipelinesError { errors })
        }
    }

    /// Every processor of type `processor_type` in pipeline `pipeline_id`, including processors
    /// wrapped by conditionals and other wrapping processors.
    pub fn processors_of_type(
        &self,
        pipeline_id: &str,
        processor_type: &str,
    ) -> Result<Vec<Arc<ProcessorNode>>> {
        let pipeline = self
            .pipeline(pipeline_id)
            .ok_or_else(|| Error::PipelineNotFound(pipeline_id.to_string()))?;
        Ok(collect_processors_of_type(&pipeline, processor_type))
    }
}

fn compile(
    id: &str,
    configuration: &PipelineConfiguration,
    processors: &ProcessorRegistry,
) -> Result<Pipeline, ConfigurationError> {
    let config = configuration
        .config_as_map()
        .map_err(|e| ConfigurationError::new(e.to_string()))?;
    Pipeline::create(id, config, processors)
}

/// Fold the metrics of `previous` into its replacement `pipeline`.
///
/// Processor metrics are matched up by position, and only when both pipelines have the same
/// number of processors and the processor at a position kept its type. A reordering that keeps
/// the count therefore attributes metrics to the wrong processors.
fn carry_metrics(previous: &Pipeline, pipeline: &Pipeline) {
    pipeline.metrics().add(previous.metrics());

    let old = previous.compound_processor().processor_metrics();
    let new = pipeline.compound_processor().processor_metrics();
    if old.len() != new.len() {
        return;
    }
    for ((new_node, new_metrics), (old_node, old_metrics)) in new.iter().zip(&old) {
        if new_node.processor_type() == old_node.processor_type() {
            new_metrics.add(old_metrics);
        }
    }
}

fn collect_processors_of_type(pipeline: &Pipeline, processor_type: &str) -> Vec<Arc<ProcessorNode>> {
    let mut found = vec![];
    for processor in pipeline.flatten_all_processors() {
        // wrappers may refer back to themselves
        let mut visited: HashSet<*const ProcessorNode> = HashSet::new();
        let mut next = Some(processor);
        while let Some(node) = next {
            if !visited.insert(Arc::as_ptr(&node)) {
                break;
            }
            if node.processor_type() == processor_type {
                found.push(Arc::clone(&node));
            }
            next = node.inner();
        }
    }
    found
}

/// Stands in for a pipeline that failed to compile.
#[derive(Debug)]
struct PoisonProcessor {
    processor_type: String,
    tag: Option<String>,
    message: String,
}

impl Processor for PoisonProcessor {
    fn processor_type(&self) -> &str {
        &self.processor_type
    }

    fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    fn description(&self) -> Option<&str> {
        Some("this is a placeholder processor")
    }

    fn execute(&self, _document: &mut IngestDocument) -> Result<ProcessorOutcome, ProcessorError> {
        Err(ProcessorError::new(
            self.processor_type.as_str(),
            self.tag(),
            self.message.clone(),
        ))
    }
}

fn poison_pipeline(id: &str, cause: &ConfigurationError) -> Pipeline {
    let processor = PoisonProcessor {
        processor_type: cause
            .processor_type
            .clone()
            .unwrap_or_else(|| UNKNOWN_PROCESSOR_TYPE.to_string()),
        tag: cause.tag.clone(),
        message: format!("pipeline with id [{id}] could not be loaded, caused by [{cause}]"),
    };
    Pipeline::new(
        id,
        Some(format!(
            "this is a place holder pipeline, because pipeline with id [{id}] could not be loaded"
        )),
        None,
        CompoundProcessor::new(false, vec![ProcessorNode::leaf(Arc::new(processor))], vec![]),
    )
}
