//! Factories that turn processor configuration into processors, and the registry that holds
//! them.

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::error::ConfigurationError;
use crate::processor::{Condition, Processor};

pub type Result<T, E = ConfigurationError> = std::result::Result<T, E>;

/// Builds a processor of one type from its configuration.
///
/// Factories remove the keys they consume from `config`; keys left behind are reported as
/// unsupported parameters.
pub trait ProcessorFactory: Debug + Send + Sync + 'static {
    fn create(
        &self,
        registry: &ProcessorRegistry,
        tag: Option<&str>,
        description: Option<&str>,
        config: &mut Map<String, Value>,
    ) -> Result<Arc<dyn Processor>>;
}

/// The input index-based factories derive processors from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexBasedPipelineConfig {
    /// Mapping of an existing index.
    pub index_mappings: Option<Value>,
    /// Mappings of the templates that will create the index, in application order.
    pub index_template_mappings: Option<Vec<Value>>,
}

impl IndexBasedPipelineConfig {
    pub fn from_index_mapping(mapping: Option<Value>) -> Self {
        Self {
            index_mappings: mapping,
            index_template_mappings: None,
        }
    }

    pub fn from_template_mappings(mappings: Vec<Value>) -> Self {
        Self {
            index_mappings: None,
            index_template_mappings: Some(mappings),
        }
    }
}

/// Contributes at most one processor to an index's synthesized pipeline.
pub trait IndexBasedProcessorFactory: Debug + Send + Sync + 'static {
    fn create(&self, config: &IndexBasedPipelineConfig) -> Result<Option<Arc<dyn Processor>>>;
}

/// Compiles the source of an `if` option into a condition.
pub trait ConditionCompiler: Debug + Send + Sync + 'static {
    fn compile(&self, source: &Value) -> Result<Arc<dyn Condition>>;
}

#[derive(Debug, Default)]
pub struct ProcessorRegistry {
    factories: BTreeMap<String, Arc<dyn ProcessorFactory>>,
    index_based_factories: BTreeMap<String, Arc<dyn IndexBasedProcessorFactory>>,
    condition_compiler: Option<Arc<dyn ConditionCompiler>>,
}

impl ProcessorRegistry {
    pub fn register(
        &mut self,
        processor_type: impl Into<String>,
        factory: Arc<dyn ProcessorFactory>,
    ) -> Result<()> {
        let processor_type = processor_type.into();
        if self.factories.contains_key(&processor_type) {
            return Err(ConfigurationError::new(format!(
                "Processor [{processor_type}] is already registered"
            )));
        }
        self.factories.insert(processor_type, factory);
        Ok(())
    }

    pub fn register_index_based(
        &mut self,
        name: impl Into<String>,
        factory: Arc<dyn IndexBasedProcessorFactory>,
    ) -> Result<()> {
        let name = name.into();
        if self.index_based_factories.contains_key(&name) {
            return Err(ConfigurationError::new(format!(
                "Index based ingest processor [{name}] is already registered"
            )));
        }
        self.index_based_factories.insert(name, factory);
        Ok(())
    }

    pub fn set_condition_compiler(&mut self, compiler: Arc<dyn ConditionCompiler>) {
        self.condition_compiler = Some(compiler);
    }

    pub fn factory(&self, processor_type: &str) -> Option<&Arc<dyn ProcessorFactory>> {
        self.factories.get(processor_type)
    }

    pub fn condition_compiler(&self) -> Option<&Arc<dyn ConditionCompiler>> {
        self.condition_compiler.as_ref()
    }

    pub fn index_based_factories(
        &self,
    ) -> impl Iterator<Item = &Arc<dyn IndexBasedProcessorFactory>> + '_ {
        self.index_based_factories.values()
    }

    /// Names of all registered processor types.
    pub fn processor_types(&self) -> impl Iterator<Item = &str> + '_ {
        self.factories.keys().map(String::as_str)
    }
}
