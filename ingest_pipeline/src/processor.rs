//! The processor graph: leaves supplied by factories, conditionals that guard an inner node, and
//! compounds that run a sequence with failure handling.

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Instant;

use ingest_types::IngestDocument;
use observability_deps::tracing::debug;
use serde_json::Value;

use crate::error::ProcessorError;
use crate::metrics::OperationMetrics;

/// Processor type reported by conditional wrappers.
pub const CONDITIONAL_TYPE: &str = "conditional";
/// Processor type reported by compound processors.
pub const COMPOUND_TYPE: &str = "compound";

pub const ON_FAILURE_MESSAGE_FIELD: &str = "on_failure_message";
pub const ON_FAILURE_PROCESSOR_TYPE_FIELD: &str = "on_failure_processor_type";
pub const ON_FAILURE_PROCESSOR_TAG_FIELD: &str = "on_failure_processor_tag";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorOutcome {
    /// Keep going with the next processor.
    Continue,
    /// The document was discarded; nothing further runs and it is not indexed.
    Dropped,
}

/// A single document transformation.
pub trait Processor: Debug + Send + Sync + 'static {
    fn processor_type(&self) -> &str;

    fn tag(&self) -> Option<&str>;

    fn description(&self) -> Option<&str> {
        None
    }

    fn execute(&self, document: &mut IngestDocument) -> Result<ProcessorOutcome, ProcessorError>;

    /// For processors that delegate to another processor, the node they wrap.
    fn inner_processor(&self) -> Option<Arc<ProcessorNode>> {
        None
    }
}

/// A compiled `if` condition.
pub trait Condition: Debug + Send + Sync + 'static {
    fn matches(&self, document: &IngestDocument) -> Result<bool, ProcessorError>;
}

#[derive(Debug)]
pub enum ProcessorNode {
    Leaf(Arc<dyn Processor>),
    Conditional(ConditionalProcessor),
    Compound(CompoundProcessor),
}

impl ProcessorNode {
    pub fn leaf(processor: Arc<dyn Processor>) -> Arc<Self> {
        Arc::new(Self::Leaf(processor))
    }

    pub fn processor_type(&self) -> &str {
        match self {
            Self::Leaf(p) => p.processor_type(),
            Self::Conditional(_) => CONDITIONAL_TYPE,
            Self::Compound(_) => COMPOUND_TYPE,
        }
    }

    pub fn tag(&self) -> Option<&str> {
        match self {
            Self::Leaf(p) => p.tag(),
            Self::Conditional(c) => c.tag.as_deref(),
            Self::Compound(_) => None,
        }
    }

    pub fn description(&self) -> Option<&str> {
        match self {
            Self::Leaf(p) => p.description(),
            Self::Conditional(c) => c.description.as_deref(),
            Self::Compound(_) => None,
        }
    }

    /// The node this one wraps, if it is a wrapper.
    pub fn inner(&self) -> Option<Arc<Self>> {
        match self {
            Self::Leaf(p) => p.inner_processor(),
            Self::Conditional(c) => Some(Arc::clone(&c.inner)),
            Self::Compound(_) => None,
        }
    }

    pub fn execute(&self, document: &mut IngestDocument) -> Result<ProcessorOutcome, ProcessorError> {
        match self {
            Self::Leaf(p) => p.execute(document),
            Self::Conditional(c) => c.execute(document),
            Self::Compound(c) => c.execute(document),
        }
    }
}

/// Runs the inner node only for documents the condition matches. Keeps its own metrics, which
/// count matched invocations only.
#[derive(Debug)]
pub struct ConditionalProcessor {
    tag: Option<String>,
    description: Option<String>,
    condition: Arc<dyn Condition>,
    inner: Arc<ProcessorNode>,
    metrics: Arc<OperationMetrics>,
}

impl ConditionalProcessor {
    pub fn new(
        tag: Option<String>,
        description: Option<String>,
        condition: Arc<dyn Condition>,
        inner: Arc<ProcessorNode>,
    ) -> Self {
        Self {
            tag,
            description,
            condition,
            inner,
            metrics: Default::default(),
        }
    }

    pub fn metrics(&self) -> &Arc<OperationMetrics> {
        &self.metrics
    }

    fn execute(&self, document: &mut IngestDocument) -> Result<ProcessorOutcome, ProcessorError> {
        if !self.condition.matches(document)? {
            return Ok(ProcessorOutcome::Continue);
        }
        self.metrics.before();
        let start = Instant::now();
        let result = self.inner.execute(document);
        self.metrics.after(start.elapsed());
        if result.is_err() {
            self.metrics.failed();
        }
        result
    }
}

/// A processor in a compound together with the metrics for its position in that compound.
#[derive(Debug, Clone)]
pub struct ProcessorEntry {
    pub node: Arc<ProcessorNode>,
    pub metrics: Arc<OperationMetrics>,
}

#[derive(Debug, Default)]
pub struct CompoundProcessor {
    ignore_failure: bool,
    processors: Vec<ProcessorEntry>,
    on_failure: Vec<Arc<ProcessorNode>>,
}

impl CompoundProcessor {
    pub fn new(
        ignore_failure: bool,
        processors: Vec<Arc<ProcessorNode>>,
        on_failure: Vec<Arc<ProcessorNode>>,
    ) -> Self {
        Self {
            ignore_failure,
            processors: processors
                .into_iter()
                .map(|node| ProcessorEntry {
                    node,
                    metrics: Default::default(),
                })
                .collect(),
            on_failure,
        }
    }

    pub fn ignore_failure(&self) -> bool {
        self.ignore_failure
    }

    pub fn processors(&self) -> impl DoubleEndedIterator<Item = &Arc<ProcessorNode>> + '_ {
        self.processors.iter().map(|e| &e.node)
    }

    pub fn processors_with_metrics(&self) -> &[ProcessorEntry] {
        &self.processors
    }

    pub fn on_failure_processors(&self) -> &[Arc<ProcessorNode>] {
        &self.on_failure
    }

    /// Number of top-level processors, not counting on-failure processors.
    pub fn len(&self) -> usize {
        self.processors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }

    /// A new compound running this compound's processors followed by `other`'s, with the
    /// on-failure processors concatenated the same way. Neither input is modified and the result
    /// starts with fresh per-position metrics.
    pub fn merge(&self, other: &Self) -> Self {
        Self::new(
            self.ignore_failure,
            self.processors()
                .chain(other.processors())
                .map(Arc::clone)
                .collect(),
            self.on_failure
                .iter()
                .chain(other.on_failure.iter())
                .map(Arc::clone)
                .collect(),
        )
    }

    fn children(&self) -> impl DoubleEndedIterator<Item = &Arc<ProcessorNode>> + '_ {
        self.processors().chain(self.on_failure.iter())
    }

    /// All processors of this graph, including on-failure processors, with nested compounds
    /// expanded in place. Conditionals and other wrappers are yielded as themselves.
    pub fn flatten(&self) -> Vec<Arc<ProcessorNode>> {
        let mut flattened = vec![];
        let mut stack: Vec<&Arc<ProcessorNode>> = self.children().rev().collect();
        while let Some(node) = stack.pop() {
            match node.as_ref() {
                ProcessorNode::Compound(c) => stack.extend(c.children().rev()),
                _ => flattened.push(Arc::clone(node)),
            }
        }
        flattened
    }

    /// Every non-compound processor reachable through the primary processors paired with the
    /// metrics that describe it. Conditionals report their own metrics.
    pub fn processor_metrics(&self) -> Vec<(Arc<ProcessorNode>, Arc<OperationMetrics>)> {
        let mut collected = vec![];
        let mut stack: Vec<&ProcessorEntry> = self.processors.iter().rev().collect();
        while let Some(entry) = stack.pop() {
            match entry.node.as_ref() {
                ProcessorNode::Compound(c) => stack.extend(c.processors.iter().rev()),
                ProcessorNode::Conditional(c) => {
                    collected.push((Arc::clone(&entry.node), Arc::clone(&c.metrics)))
                }
                ProcessorNode::Leaf(_) => {
                    collected.push((Arc::clone(&entry.node), Arc::clone(&entry.metrics)))
                }
            }
        }
        collected
    }

    pub fn execute(&self, document: &mut IngestDocument) -> Result<ProcessorOutcome, ProcessorError> {
        for entry in &self.processors {
            entry.metrics.before();
            let start = Instant::now();
            let result = entry.node.execute(document);
            entry.metrics.after(start.elapsed());
            match result {
                Ok(ProcessorOutcome::Continue) => {}
                Ok(ProcessorOutcome::Dropped) => return Ok(ProcessorOutcome::Dropped),
                Err(e) => {
                    entry.metrics.failed();
                    if self.ignore_failure {
                        debug!(
                            processor_type = %e.processor_type,
                            error = %e,
                            "ignoring processor failure"
                        );
                        continue;
                    }
                    if self.on_failure.is_empty() {
                        return Err(e);
                    }
                    return self.execute_on_failure(document, &e);
                }
            }
        }
        Ok(ProcessorOutcome::Continue)
    }

    fn execute_on_failure(
        &self,
        document: &mut IngestDocument,
        cause: &ProcessorError,
    ) -> Result<ProcessorOutcome, ProcessorError> {
        let metadata = &mut document.ingest_metadata;
        metadata.insert(
            ON_FAILURE_MESSAGE_FIELD.to_string(),
            Value::from(cause.message.clone()),
        );
        metadata.insert(
            ON_FAILURE_PROCESSOR_TYPE_FIELD.to_string(),
            Value::from(cause.processor_type.clone()),
        );
        metadata.insert(
            ON_FAILURE_PROCESSOR_TAG_FIELD.to_string(),
            cause.tag.clone().map(Value::from).unwrap_or(Value::Null),
        );

        let mut outcome = Ok(ProcessorOutcome::Continue);
        for processor in &self.on_failure {
            match processor.execute(document) {
                Ok(ProcessorOutcome::Continue) => {}
                other => {
                    outcome = other;
                    break;
                }
            }
        }

        let metadata = &mut document.ingest_metadata;
        metadata.remove(ON_FAILURE_MESSAGE_FIELD);
        metadata.remove(ON_FAILURE_PROCESSOR_TYPE_FIELD);
        metadata.remove(ON_FAILURE_PROCESSOR_TAG_FIELD);
        outcome
    }
}
