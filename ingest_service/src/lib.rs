//! The ingest service of a node.
//!
//! [`IngestService`] keeps the node's compiled pipelines in step with the cluster state, resolves
//! which pipelines apply to each incoming index request, and runs bulks of requests through
//! them on a worker pool.

pub mod cluster;
pub mod error;
pub mod executor;
pub mod pools;
pub mod registry;
pub mod resolver;
pub mod service;
pub mod stats;

pub use cluster::{ClusterService, ClusterStateApplier, ClusterStateListener, LocalClusterService};
pub use error::{Error, Result};
pub use executor::{BulkItems, BulkListener, BulkResolution};
pub use pools::{PoolRuntimes, WorkerPools};
pub use registry::{PipelineHolder, PipelineRegistry};
pub use resolver::PipelineResolver;
pub use service::{IngestService, MAX_PIPELINE_ID_BYTES};
pub use stats::{IngestStats, PipelineStats, ProcessorStats};
