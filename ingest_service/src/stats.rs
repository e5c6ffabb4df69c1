use ingest_pipeline::{OperationStats, Pipeline, ProcessorNode};
use serde::Serialize;

/// Ingest metrics of a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestStats {
    pub total: OperationStats,
    /// Sorted by pipeline id.
    pub pipelines: Vec<PipelineStats>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    pub id: String,
    pub stats: OperationStats,
    pub processors: Vec<ProcessorStats>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessorStats {
    /// `type[:tag]` of the processor, looking through conditionals.
    pub name: String,
    pub processor_type: String,
    pub stats: OperationStats,
}

impl PipelineStats {
    pub(crate) fn new(id: &str, pipeline: &Pipeline) -> Self {
        Self {
            id: id.to_string(),
            stats: pipeline.metrics().stats(),
            processors: pipeline
                .compound_processor()
                .processor_metrics()
                .into_iter()
                .map(|(node, metrics)| ProcessorStats {
                    name: processor_name(&node),
                    processor_type: node.processor_type().to_string(),
                    stats: metrics.stats(),
                })
                .collect(),
        }
    }
}

fn processor_name(node: &ProcessorNode) -> String {
    let named = match node {
        ProcessorNode::Conditional(_) => node.inner(),
        _ => None,
    };
    let named = named.as_deref().unwrap_or(node);
    match named.tag() {
        Some(tag) if !tag.is_empty() => format!("{}:{tag}", named.processor_type()),
        _ => named.processor_type().to_string(),
    }
}
