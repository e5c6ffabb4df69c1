//! Processors, factories and fixtures for the tests of the ingest crates.
//!
//! Registered processor types:
//!
//! | type        | config                    | effect                                   |
//! |-------------|---------------------------|------------------------------------------|
//! | `uppercase` | `field`                   | uppercases a string field                |
//! | `set`       | `field`, `value`          | sets a field                             |
//! | `fail`      | `message`                 | always fails                             |
//! | `drop`      |                           | drops the document                       |
//! | `set_index` | `index`                   | retargets the document to another index  |
//!
//! Conditions (`if`) name a field; they match documents that have it.
//!
//! The index-based factory `mapping_set` reads `_meta.index_pipeline.{field,value}` from the
//! index mapping, or from the first template mapping that has it, and contributes a `set`.

use std::sync::Arc;

use ingest_pipeline::config::read_string;
use ingest_pipeline::{
    CompoundProcessor, Condition, ConditionCompiler, ConfigurationError,
    IndexBasedPipelineConfig, IndexBasedProcessorFactory, Pipeline, Processor, ProcessorError,
    ProcessorFactory, ProcessorNode, ProcessorOutcome, ProcessorRegistry,
};
use ingest_types::IngestDocument;
use serde_json::{Map, Value};

type Result<T, E = ConfigurationError> = std::result::Result<T, E>;

#[derive(Debug)]
pub struct UppercaseProcessor {
    pub tag: Option<String>,
    pub field: String,
}

impl Processor for UppercaseProcessor {
    fn processor_type(&self) -> &str {
        "uppercase"
    }

    fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    fn execute(&self, document: &mut IngestDocument) -> Result<ProcessorOutcome, ProcessorError> {
        let upper = match document.field(&self.field) {
            Some(Value::String(s)) => s.to_uppercase(),
            _ => {
                return Err(ProcessorError::new(
                    "uppercase",
                    self.tag(),
                    format!("field [{}] not present as part of path [{}]", self.field, self.field),
                ));
            }
        };
        document.set_field(self.field.clone(), Value::from(upper));
        Ok(ProcessorOutcome::Continue)
    }
}

#[derive(Debug)]
pub struct SetProcessor {
    pub tag: Option<String>,
    pub field: String,
    pub value: Value,
}

impl Processor for SetProcessor {
    fn processor_type(&self) -> &str {
        "set"
    }

    fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    fn execute(&self, document: &mut IngestDocument) -> Result<ProcessorOutcome, ProcessorError> {
        document.set_field(self.field.clone(), self.value.clone());
        Ok(ProcessorOutcome::Continue)
    }
}

#[derive(Debug)]
pub struct FailProcessor {
    pub tag: Option<String>,
    pub message: String,
}

impl Processor for FailProcessor {
    fn processor_type(&self) -> &str {
        "fail"
    }

    fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    fn execute(&self, _document: &mut IngestDocument) -> Result<ProcessorOutcome, ProcessorError> {
        Err(ProcessorError::new("fail", self.tag(), self.message.clone()))
    }
}

#[derive(Debug)]
pub struct DropProcessor {
    pub tag: Option<String>,
}

impl Processor for DropProcessor {
    fn processor_type(&self) -> &str {
        "drop"
    }

    fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    fn execute(&self, _document: &mut IngestDocument) -> Result<ProcessorOutcome, ProcessorError> {
        Ok(ProcessorOutcome::Dropped)
    }
}

#[derive(Debug)]
pub struct SetIndexProcessor {
    pub tag: Option<String>,
    pub index: String,
}

impl Processor for SetIndexProcessor {
    fn processor_type(&self) -> &str {
        "set_index"
    }

    fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    fn execute(&self, document: &mut IngestDocument) -> Result<ProcessorOutcome, ProcessorError> {
        document.index.clone_from(&self.index);
        Ok(ProcessorOutcome::Continue)
    }
}

/// Builds the test processors from their configuration.
#[derive(Debug, Clone, Copy)]
pub enum TestProcessorFactory {
    Uppercase,
    Set,
    Fail,
    Drop,
    SetIndex,
}

impl TestProcessorFactory {
    pub const ALL: [(&'static str, Self); 5] = [
        ("uppercase", Self::Uppercase),
        ("set", Self::Set),
        ("fail", Self::Fail),
        ("drop", Self::Drop),
        ("set_index", Self::SetIndex),
    ];
}

impl ProcessorFactory for TestProcessorFactory {
    fn create(
        &self,
        _registry: &ProcessorRegistry,
        tag: Option<&str>,
        _description: Option<&str>,
        config: &mut Map<String, Value>,
    ) -> Result<Arc<dyn Processor>> {
        let owned_tag = tag.map(ToString::to_string);
        Ok(match self {
            Self::Uppercase => Arc::new(UppercaseProcessor {
                tag: owned_tag,
                field: read_string(Some("uppercase"), tag, config, "field")?,
            }),
            Self::Set => {
                let field = read_string(Some("set"), tag, config, "field")?;
                let value = config.remove("value").ok_or_else(|| {
                    ConfigurationError::for_property(
                        Some("set"),
                        tag,
                        Some("value"),
                        "required property is missing",
                    )
                })?;
                Arc::new(SetProcessor {
                    tag: owned_tag,
                    field,
                    value,
                })
            }
            Self::Fail => Arc::new(FailProcessor {
                tag: owned_tag,
                message: read_string(Some("fail"), tag, config, "message")?,
            }),
            Self::Drop => Arc::new(DropProcessor { tag: owned_tag }),
            Self::SetIndex => Arc::new(SetIndexProcessor {
                tag: owned_tag,
                index: read_string(Some("set_index"), tag, config, "index")?,
            }),
        })
    }
}

#[derive(Debug)]
pub struct FieldExistsCondition {
    pub field: String,
}

impl Condition for FieldExistsCondition {
    fn matches(&self, document: &IngestDocument) -> Result<bool, ProcessorError> {
        Ok(document.has_field(&self.field))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FieldExistsCompiler;

impl ConditionCompiler for FieldExistsCompiler {
    fn compile(&self, source: &Value) -> Result<Arc<dyn Condition>> {
        match source {
            Value::String(field) => Ok(Arc::new(FieldExistsCondition {
                field: field.clone(),
            })),
            _ => Err(ConfigurationError::for_property(
                Some("conditional"),
                None,
                Some("if"),
                "condition must be a field name",
            )),
        }
    }
}

/// Contributes a `set` processor described under `_meta.index_pipeline` in a mapping.
#[derive(Debug, Clone, Copy)]
pub struct MappingSetFactory;

impl MappingSetFactory {
    fn from_mapping(mapping: &Value) -> Option<Arc<dyn Processor>> {
        let described = mapping.get("_meta")?.get("index_pipeline")?;
        let field = described.get("field")?.as_str()?.to_string();
        let value = described.get("value")?.clone();
        Some(Arc::new(SetProcessor {
            tag: Some("index_based".to_string()),
            field,
            value,
        }))
    }
}

impl IndexBasedProcessorFactory for MappingSetFactory {
    fn create(&self, config: &IndexBasedPipelineConfig) -> Result<Option<Arc<dyn Processor>>> {
        if let Some(mapping) = &config.index_mappings {
            return Ok(Self::from_mapping(mapping));
        }
        Ok(config
            .index_template_mappings
            .iter()
            .flatten()
            .find_map(Self::from_mapping))
    }
}

/// A registry with every test processor, the field-exists condition compiler and the
/// `mapping_set` index-based factory installed.
pub fn processor_registry() -> ProcessorRegistry {
    let mut registry = ProcessorRegistry::default();
    for (name, factory) in TestProcessorFactory::ALL {
        registry
            .register(name, Arc::new(factory))
            .expect("test processor types are unique");
    }
    registry
        .register_index_based("mapping_set", Arc::new(MappingSetFactory))
        .expect("index based factory names are unique");
    registry.set_condition_compiler(Arc::new(FieldExistsCompiler));
    registry
}

/// A pipeline with `n` top-level `set` processors.
pub fn pipeline_with_processors(id: &str, n: usize) -> Pipeline {
    let processors = (0..n)
        .map(|i| {
            ProcessorNode::leaf(Arc::new(SetProcessor {
                tag: None,
                field: format!("field_{i}"),
                value: Value::from(i),
            }))
        })
        .collect();
    Pipeline::new(id, None, None, CompoundProcessor::new(false, processors, vec![]))
}

/// Unwrap a JSON object literal into a map.
pub fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {other}"),
    }
}
