//! Pipelines and the processor graph they execute.
//!
//! Processor implementations are supplied from outside through [`ProcessorFactory`] and
//! [`IndexBasedProcessorFactory`] registrations; this crate handles everything around them:
//! parsing pipeline definitions, failure handling, conditionals, merging and metrics.

pub mod config;
pub mod error;
pub mod factory;
pub mod metrics;
pub mod pipeline;
pub mod processor;

pub use error::{ConfigurationError, ProcessorError};
pub use factory::{
    ConditionCompiler, IndexBasedPipelineConfig, IndexBasedProcessorFactory, ProcessorFactory,
    ProcessorRegistry,
};
pub use metrics::{OperationMetrics, OperationStats};
pub use pipeline::Pipeline;
pub use processor::{
    CONDITIONAL_TYPE, CompoundProcessor, Condition, ConditionalProcessor, Processor,
    ProcessorEntry, ProcessorNode, ProcessorOutcome,
};

/// The reserved pipeline id meaning "no pipeline".
pub const NOOP_PIPELINE_NAME: &str = "_none";
