//! Shared data types of the ingest subsystem: write requests, the documents pipelines operate
//! on, and the slice of cluster state that pipeline resolution reads.

pub mod cluster;
pub mod document;
pub mod metadata;
pub mod node;
pub mod pattern;
pub mod pipeline_config;
pub mod request;
pub mod template;

pub use cluster::{ClusterChangedEvent, ClusterState};
pub use document::IngestDocument;
pub use metadata::{AliasMetadata, Index, IndexMetadata, IndexSettings, Metadata};
pub use node::{DiscoveryNode, IngestInfo};
pub use pipeline_config::{IngestMetadata, MediaType, PipelineConfiguration};
pub use request::{DeleteRequest, DocWriteRequest, IndexRequest, UpdateRequest, VersionType};
pub use template::{ComposableIndexTemplate, IndexTemplateMetadata, Template};
