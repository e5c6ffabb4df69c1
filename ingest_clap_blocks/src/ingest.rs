//! Limits applied to pipelines and bulk execution.

use std::num::NonZeroUsize;

/// CLI config for the ingest pipeline service.
#[derive(Debug, Clone, Copy, clap::Parser)]
pub struct IngestConfig {
    /// Maximum number of processors a single pipeline may define, counting nested and
    /// on-failure processors.
    ///
    /// Applies to pipelines stored after startup; the limit can also be changed at runtime.
    #[clap(
        long = "ingest-max-processors",
        env = "INGEST_MAX_PROCESSORS",
        default_value_t = NonZeroUsize::MAX,
        action
    )]
    pub max_processors: NonZeroUsize,

    /// Number of documents sharing a pipeline chain that are run through it together.
    #[clap(
        long = "ingest-batch-size",
        env = "INGEST_BATCH_SIZE",
        default_value_t = NonZeroUsize::MIN,
        action
    )]
    pub batch_size: NonZeroUsize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::ffi::OsString;

    #[test]
    fn defaults() {
        let config = IngestConfig::parse_from(std::iter::empty::<OsString>());
        assert_eq!(config.max_processors, NonZeroUsize::MAX);
        assert_eq!(config.batch_size.get(), 1);
    }

    #[test]
    fn overrides() {
        let config = IngestConfig::parse_from([
            "ingest",
            "--ingest-max-processors",
            "20",
            "--ingest-batch-size",
            "64",
        ]);
        assert_eq!(config.max_processors.get(), 20);
        assert_eq!(config.batch_size.get(), 64);
    }

    #[test]
    fn zero_rejected() {
        let err = IngestConfig::try_parse_from(["ingest", "--ingest-batch-size", "0"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }
}
