use std::fmt;

/// A pipeline or processor definition that cannot be turned into a working pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigurationError {
    pub processor_type: Option<String>,
    pub tag: Option<String>,
    pub property: Option<String>,
    pub message: String,
}

impl ConfigurationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            processor_type: None,
            tag: None,
            property: None,
            message: message.into(),
        }
    }

    /// An error about one property of a processor's configuration.
    pub fn for_property(
        processor_type: Option<&str>,
        tag: Option<&str>,
        property: Option<&str>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            processor_type: processor_type.map(ToString::to_string),
            tag: tag.map(ToString::to_string),
            property: property.map(ToString::to_string),
            message: message.into(),
        }
    }
}

impl fmt::Display for ConfigurationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.property {
            Some(property) => write!(f, "[{property}] {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for ConfigurationError {}

/// A processor failed while transforming a document.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ProcessorError {
    pub processor_type: String,
    pub tag: Option<String>,
    pub message: String,
}

impl ProcessorError {
    pub fn new(processor_type: impl Into<String>, tag: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            processor_type: processor_type.into(),
            tag: tag.map(ToString::to_string),
            message: message.into(),
        }
    }
}
