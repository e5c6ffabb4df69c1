use ingest_pipeline::{ConfigurationError, ProcessorError};

/// Errors of the ingest service.
///
/// Cloneable so that a single failure can be reported for every document it affects.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("pipeline with id [{0}] does not exist")]
    PipelineNotFound(String),

    #[error("Index-based ingest pipeline with id [{0}] does not exist")]
    IndexBasedPipelineNotFound(String),

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error("{}", join_messages(.0))]
    Validation(Vec<ConfigurationError>),

    #[error("{source}")]
    Execution {
        pipeline_id: String,
        source: ProcessorError,
    },

    #[error("final pipeline [{0}] can't change the target index")]
    FinalPipelineChangedIndex(String),

    #[error("pipeline [{0}] is missing")]
    PipelineMissing(String),

    #[error("Ingest info is empty")]
    IngestInfoEmpty,

    #[error("no worker pool named [{0}]")]
    UnknownExecutor(String),

    #[error("invalid pipeline source: {0}")]
    InvalidPipelineSource(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

fn join_messages(errors: &[ConfigurationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl From<ingest_types::pipeline_config::Error> for Error {
    fn from(e: ingest_types::pipeline_config::Error) -> Self {
        Self::InvalidPipelineSource(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_lists_every_error() {
        let err = Error::Validation(vec![
            ConfigurationError::new("Processor type [a] is not installed on node [n1]"),
            ConfigurationError::new("Processor type [b] is not installed on node [n1]"),
        ]);
        assert_eq!(
            err.to_string(),
            "Processor type [a] is not installed on node [n1]; \
             Processor type [b] is not installed on node [n1]"
        );
    }
}
