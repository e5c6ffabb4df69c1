//! Versioned cluster state snapshots and the events describing a transition between two.

use std::sync::Arc;

use crate::metadata::{IndexMetadata, Metadata};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClusterState {
    pub version: u64,
    pub metadata: Arc<Metadata>,
    /// Set until the cluster has recovered its persisted state. Pipelines are not loaded from a
    /// state that is not recovered.
    pub not_recovered: bool,
}

impl ClusterState {
    pub fn new(metadata: Metadata) -> Self {
        Self {
            version: 0,
            metadata: Arc::new(metadata),
            not_recovered: false,
        }
    }

    /// A successor state carrying `metadata`.
    pub fn next(&self, metadata: Metadata) -> Self {
        Self {
            version: self.version + 1,
            metadata: Arc::new(metadata),
            not_recovered: self.not_recovered,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClusterChangedEvent {
    pub source: String,
    pub previous: Arc<ClusterState>,
    pub state: Arc<ClusterState>,
}

impl ClusterChangedEvent {
    pub fn new(
        source: impl Into<String>,
        previous: Arc<ClusterState>,
        state: Arc<ClusterState>,
    ) -> Self {
        Self {
            source: source.into(),
            previous,
            state,
        }
    }

    /// Indices of the previous state that are gone, or whose metadata changed, in the new state.
    pub fn removed_or_changed_indices(&self) -> impl Iterator<Item = &Arc<IndexMetadata>> + '_ {
        self.previous
            .metadata
            .indices
            .values()
            .filter(|prev| match self.state.metadata.index(prev.name()) {
                None => true,
                Some(current) => current.index != prev.index || current.version != prev.version,
            })
    }

    pub fn metadata_changed(&self) -> bool {
        !Arc::ptr_eq(&self.previous.metadata, &self.state.metadata)
            && self.previous.metadata != self.state.metadata
    }
}
