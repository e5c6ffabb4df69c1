//! The interface to the cluster state this node follows, and a single node implementation.

use std::fmt::Debug;
use std::sync::{Arc, Weak};

use ingest_types::{ClusterChangedEvent, ClusterState, DiscoveryNode, Metadata};
use observability_deps::tracing::debug;
use parking_lot::RwLock;

use crate::error::Result;

/// Computes new metadata from the current cluster state, or `None` to leave the state as is.
pub type StateUpdateTask = Box<dyn FnOnce(&ClusterState) -> Result<Option<Metadata>> + Send>;

/// Receives every cluster state this node applies.
pub trait ClusterStateApplier: Debug + Send + Sync + 'static {
    fn apply_cluster_state(&self, event: &ClusterChangedEvent);
}

/// Notified of each applied cluster state before ingest pipelines are rebuilt from it.
pub trait ClusterStateListener: Debug + Send + Sync + 'static {
    fn cluster_state_changed(&self, state: &ClusterState);
}

#[async_trait::async_trait]
pub trait ClusterService: Debug + Send + Sync + 'static {
    fn local_node(&self) -> &DiscoveryNode;

    /// The last applied cluster state.
    fn state(&self) -> Arc<ClusterState>;

    /// Register an applier. Appliers are held weakly and dropped once their owner is gone.
    fn add_applier(&self, applier: Weak<dyn ClusterStateApplier>);

    /// Run `task` against the current state and publish the result, returning the state that is
    /// in effect afterwards. Updates are applied one at a time.
    async fn submit_state_update(
        &self,
        source: String,
        task: StateUpdateTask,
    ) -> Result<Arc<ClusterState>>;
}

/// A cluster of one: updates are applied locally and delivered to appliers synchronously.
#[derive(Debug)]
pub struct LocalClusterService {
    local_node: DiscoveryNode,
    state: RwLock<Arc<ClusterState>>,
    appliers: RwLock<Vec<Weak<dyn ClusterStateApplier>>>,
    update_lock: tokio::sync::Mutex<()>,
}

impl LocalClusterService {
    pub fn new(local_node: DiscoveryNode, initial: ClusterState) -> Self {
        Self {
            local_node,
            state: RwLock::new(Arc::new(initial)),
            appliers: Default::default(),
            update_lock: Default::default(),
        }
    }

    fn live_appliers(&self) -> Vec<Arc<dyn ClusterStateApplier>> {
        let mut appliers = self.appliers.write();
        appliers.retain(|applier| applier.strong_count() > 0);
        appliers.iter().filter_map(Weak::upgrade).collect()
    }
}

#[async_trait::async_trait]
impl ClusterService for LocalClusterService {
    fn local_node(&self) -> &DiscoveryNode {
        &self.local_node
    }

    fn state(&self) -> Arc<ClusterState> {
        Arc::clone(&self.state.read())
    }

    fn add_applier(&self, applier: Weak<dyn ClusterStateApplier>) {
        self.appliers.write().push(applier);
    }

    async fn submit_state_update(
        &self,
        source: String,
        task: StateUpdateTask,
    ) -> Result<Arc<ClusterState>> {
        let _guard = self.update_lock.lock().await;
        let previous = self.state();
        let Some(metadata) = task(&previous)? else {
            debug!(%source, version = previous.version, "cluster state unchanged");
            return Ok(previous);
        };

        let state = Arc::new(previous.next(metadata));
        *self.state.write() = Arc::clone(&state);
        debug!(%source, version = state.version, "applying cluster state");

        let event = ClusterChangedEvent::new(source, previous, Arc::clone(&state));
        for applier in self.live_appliers() {
            applier.apply_cluster_state(&event);
        }
        Ok(state)
    }
}
