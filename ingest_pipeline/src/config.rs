//! Readers for processor and pipeline configuration maps, and the generic processor parsing that
//! applies `tag`, `description`, `if`, `ignore_failure` and `on_failure` around a factory's leaf.

use std::sync::Arc;

use serde_json::{Map, Value};

use crate::error::ConfigurationError;
use crate::factory::{ProcessorRegistry, Result};
use crate::processor::{CompoundProcessor, ConditionalProcessor, ProcessorNode};

pub const TAG_KEY: &str = "tag";
pub const DESCRIPTION_KEY: &str = "description";
pub const IGNORE_FAILURE_KEY: &str = "ignore_failure";
pub const ON_FAILURE_KEY: &str = "on_failure";
pub const IF_KEY: &str = "if";

fn value_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "map",
    }
}

fn missing(processor_type: Option<&str>, tag: Option<&str>, property: &str) -> ConfigurationError {
    ConfigurationError::for_property(processor_type, tag, Some(property), "required property is missing")
}

fn wrong_type(
    processor_type: Option<&str>,
    tag: Option<&str>,
    property: &str,
    expected: &str,
    value: &Value,
) -> ConfigurationError {
    ConfigurationError::for_property(
        processor_type,
        tag,
        Some(property),
        format!(
            "property isn't a {expected}, but of type [{}]",
            value_type(value)
        ),
    )
}

pub fn read_optional_string(
    processor_type: Option<&str>,
    tag: Option<&str>,
    config: &mut Map<String, Value>,
    property: &str,
) -> Result<Option<String>> {
    match config.remove(property) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(other) => Err(wrong_type(processor_type, tag, property, "string", &other)),
    }
}

pub fn read_string(
    processor_type: Option<&str>,
    tag: Option<&str>,
    config: &mut Map<String, Value>,
    property: &str,
) -> Result<String> {
    read_optional_string(processor_type, tag, config, property)?
        .ok_or_else(|| missing(processor_type, tag, property))
}

pub fn read_bool(
    processor_type: Option<&str>,
    tag: Option<&str>,
    config: &mut Map<String, Value>,
    property: &str,
    default: bool,
) -> Result<bool> {
    match config.remove(property) {
        None | Some(Value::Null) => Ok(default),
        Some(Value::Bool(b)) => Ok(b),
        Some(other) => Err(wrong_type(processor_type, tag, property, "boolean", &other)),
    }
}

pub fn read_optional_i64(
    processor_type: Option<&str>,
    tag: Option<&str>,
    config: &mut Map<String, Value>,
    property: &str,
) -> Result<Option<i64>> {
    match config.remove(property) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) if n.is_i64() => Ok(n.as_i64()),
        Some(other) => Err(wrong_type(processor_type, tag, property, "integer", &other)),
    }
}

pub fn read_optional_list(
    processor_type: Option<&str>,
    tag: Option<&str>,
    config: &mut Map<String, Value>,
    property: &str,
) -> Result<Option<Vec<Value>>> {
    match config.remove(property) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Array(list)) => Ok(Some(list)),
        Some(other) => Err(wrong_type(processor_type, tag, property, "list", &other)),
    }
}

pub fn read_list(
    processor_type: Option<&str>,
    tag: Option<&str>,
    config: &mut Map<String, Value>,
    property: &str,
) -> Result<Vec<Value>> {
    read_optional_list(processor_type, tag, config, property)?
        .ok_or_else(|| missing(processor_type, tag, property))
}

/// Parse a list of `{type: config}` objects into processors.
pub fn read_processor_configs(
    registry: &ProcessorRegistry,
    configs: Vec<Value>,
) -> Result<Vec<Arc<ProcessorNode>>> {
    let mut processors = Vec::with_capacity(configs.len());
    for config in configs {
        let Value::Object(entries) = config else {
            return Err(ConfigurationError::new(format!(
                "processor definition must be a map, but was of type [{}]",
                value_type(&config)
            )));
        };
        for (processor_type, config) in entries {
            processors.push(read_processor(registry, &processor_type, config)?);
        }
    }
    Ok(processors)
}

/// Parse a single processor of `processor_type`.
pub fn read_processor(
    registry: &ProcessorRegistry,
    processor_type: &str,
    config: Value,
) -> Result<Arc<ProcessorNode>> {
    let Value::Object(mut config) = config else {
        return Err(ConfigurationError::for_property(
            Some(processor_type),
            None,
            None,
            format!(
                "processor [{processor_type}] configuration must be a map, but was of type [{}]",
                value_type(&config)
            ),
        ));
    };
    let ptype = Some(processor_type);

    let tag = read_optional_string(ptype, None, &mut config, TAG_KEY)?;
    let description = read_optional_string(ptype, tag.as_deref(), &mut config, DESCRIPTION_KEY)?;
    let ignore_failure = read_bool(ptype, tag.as_deref(), &mut config, IGNORE_FAILURE_KEY, false)?;
    let on_failure = read_optional_list(ptype, tag.as_deref(), &mut config, ON_FAILURE_KEY)?;
    let condition = config.remove(IF_KEY);

    let on_failure = match on_failure {
        Some(configs) if configs.is_empty() => {
            return Err(ConfigurationError::for_property(
                ptype,
                tag.as_deref(),
                Some(ON_FAILURE_KEY),
                "processors list cannot be empty",
            ));
        }
        Some(configs) => read_processor_configs(registry, configs)?,
        None => vec![],
    };

    let factory = registry.factory(processor_type).ok_or_else(|| {
        ConfigurationError::for_property(
            ptype,
            tag.as_deref(),
            None,
            format!("No processor type exists with name [{processor_type}]"),
        )
    })?;
    let leaf = factory.create(registry, tag.as_deref(), description.as_deref(), &mut config)?;
    if !config.is_empty() {
        let unused: Vec<_> = config.keys().map(String::as_str).collect();
        return Err(ConfigurationError::for_property(
            ptype,
            tag.as_deref(),
            Some(format!("[{}]", unused.join(", ")).as_str()),
            format!(
                "processor [{processor_type}] doesn't support one or more provided configuration parameters"
            ),
        ));
    }

    let mut node = ProcessorNode::leaf(leaf);
    if ignore_failure || !on_failure.is_empty() {
        node = Arc::new(ProcessorNode::Compound(CompoundProcessor::new(
            ignore_failure,
            vec![node],
            on_failure,
        )));
    }
    if let Some(source) = condition {
        let compiler = registry.condition_compiler().ok_or_else(|| {
            ConfigurationError::for_property(
                ptype,
                tag.as_deref(),
                Some(IF_KEY),
                "conditions are not supported: no condition compiler is installed",
            )
        })?;
        let condition = compiler.compile(&source)?;
        node = Arc::new(ProcessorNode::Conditional(ConditionalProcessor::new(
            tag,
            description,
            condition,
            node,
        )));
    }
    Ok(node)
}
