//! The ingest service: owns the pipelines of this node and follows the cluster state they are
//! defined in.

use std::collections::BTreeMap;
use std::io;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use ingest_cache::IndexBasedPipelineCache;
use ingest_clap_blocks::ingest::IngestConfig;
use ingest_clap_blocks::pool::WorkerPoolsConfig;
use ingest_pipeline::{
    CONDITIONAL_TYPE, ConfigurationError, OperationMetrics, Pipeline, ProcessorNode,
    ProcessorRegistry,
};
use ingest_types::pattern::{is_match_all_pattern, is_simple_match_pattern, simple_match};
use ingest_types::{
    ClusterChangedEvent, ClusterState, DiscoveryNode, IngestInfo, Metadata, PipelineConfiguration,
};
use iox_time::TimeProvider;
use observability_deps::tracing::{debug, info, warn};
use parking_lot::RwLock;

use crate::cluster::{ClusterService, ClusterStateApplier, ClusterStateListener};
use crate::error::{Error, Result};
use crate::pools::{PoolRuntimes, WorkerPools};
use crate::registry::PipelineRegistry;
use crate::resolver::PipelineResolver;
use crate::stats::{IngestStats, PipelineStats};

/// Longest pipeline id accepted, in UTF-8 bytes.
pub const MAX_PIPELINE_ID_BYTES: usize = 512;

#[derive(Debug)]
pub struct IngestService {
    pub(crate) config: IngestConfig,
    max_processors: AtomicUsize,
    processors: Arc<ProcessorRegistry>,
    pub(crate) registry: PipelineRegistry,
    pub(crate) cache: Arc<IndexBasedPipelineCache>,
    pub(crate) resolver: PipelineResolver,
    cluster_service: Arc<dyn ClusterService>,
    state: RwLock<Arc<ClusterState>>,
    pub(crate) pools: WorkerPools,
    pub(crate) total_metrics: OperationMetrics,
    listeners: RwLock<Vec<Arc<dyn ClusterStateListener>>>,
}

impl IngestService {
    /// Create the service and register it with `cluster_service`. The current cluster state is
    /// applied straight away.
    pub fn new(
        config: IngestConfig,
        processors: ProcessorRegistry,
        cluster_service: Arc<dyn ClusterService>,
        pools: WorkerPools,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Arc<Self> {
        let processors = Arc::new(processors);
        let cache = Arc::new(IndexBasedPipelineCache::new(time_provider));
        let initial = cluster_service.state();

        let service = Arc::new(Self {
            config,
            max_processors: AtomicUsize::new(config.max_processors.get()),
            registry: PipelineRegistry::new(Arc::clone(&processors)),
            resolver: PipelineResolver::new(Arc::clone(&processors), Arc::clone(&cache)),
            processors,
            cache,
            cluster_service,
            state: RwLock::new(Arc::new(ClusterState::default())),
            pools,
            total_metrics: Default::default(),
            listeners: Default::default(),
        });

        let applier: Weak<dyn ClusterStateApplier> = Arc::downgrade(&service) as _;
        service.cluster_service.add_applier(applier);
        service.apply_cluster_state(&ClusterChangedEvent::new(
            "initial",
            Arc::new(ClusterState::default()),
            initial,
        ));
        service
    }

    /// Build the worker pools described by `pools` and a service that runs bulks on them. The
    /// pools shut down when the returned [`PoolRuntimes`] is dropped.
    pub fn start(
        config: IngestConfig,
        pools: &WorkerPoolsConfig,
        processors: ProcessorRegistry,
        cluster_service: Arc<dyn ClusterService>,
        time_provider: Arc<dyn TimeProvider>,
    ) -> io::Result<(Arc<Self>, PoolRuntimes)> {
        let runtimes = PoolRuntimes::build(pools)?;
        let service = Self::new(
            config,
            processors,
            cluster_service,
            runtimes.pools(),
            time_provider,
        );
        Ok((service, runtimes))
    }

    /// The cluster state most recently applied.
    pub fn state(&self) -> Arc<ClusterState> {
        Arc::clone(&self.state.read())
    }

    pub fn cluster_service(&self) -> &Arc<dyn ClusterService> {
        &self.cluster_service
    }

    pub fn index_based_cache(&self) -> &IndexBasedPipelineCache {
        &self.cache
    }

    pub fn resolver(&self) -> &PipelineResolver {
        &self.resolver
    }

    pub fn get_pipeline(&self, id: &str) -> Option<Arc<Pipeline>> {
        self.registry.pipeline(id)
    }

    pub fn pipeline_ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.registry.snapshot().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// See [`PipelineRegistry::processors_of_type`].
    pub fn processors_of_type(
        &self,
        pipeline_id: &str,
        processor_type: &str,
    ) -> Result<Vec<Arc<ProcessorNode>>> {
        self.registry.processors_of_type(pipeline_id, processor_type)
    }

    pub fn max_processor_count(&self) -> usize {
        self.max_processors.load(Ordering::Relaxed)
    }

    /// Change the processor limit applied to pipelines stored from now on.
    pub fn set_max_processor_count(&self, max: NonZeroUsize) {
        info!(max_processors = max.get(), "updated maximum processor count");
        self.max_processors.store(max.get(), Ordering::Relaxed);
    }

    /// Register `listener` to see each applied cluster state before pipelines are rebuilt
    /// from it.
    pub fn add_cluster_state_listener(&self, listener: Arc<dyn ClusterStateListener>) {
        self.listeners.write().push(listener);
    }

    /// The processor types this node can run.
    pub fn info(&self) -> IngestInfo {
        IngestInfo::new(self.processors.processor_types())
    }

    pub fn stats(&self) -> IngestStats {
        let pipelines = self.registry.snapshot();
        let mut stats: Vec<_> = pipelines
            .iter()
            .map(|(id, holder)| PipelineStats::new(id, &holder.pipeline))
            .collect();
        stats.sort_by(|a, b| a.id.cmp(&b.id));
        IngestStats {
            total: self.total_metrics.stats(),
            pipelines: stats,
        }
    }

    /// Validate `configuration` against the nodes described by `ingest_infos` and store it in
    /// the cluster state.
    pub async fn put_pipeline(
        &self,
        ingest_infos: &BTreeMap<DiscoveryNode, IngestInfo>,
        configuration: PipelineConfiguration,
    ) -> Result<()> {
        self.validate_pipeline(ingest_infos, &configuration)?;

        let configuration = Arc::new(configuration);
        let source = format!("put-pipeline-{}", configuration.id);
        self.cluster_service
            .submit_state_update(
                source,
                Box::new(move |state| Ok(Some(inner_put(&state.metadata, configuration)))),
            )
            .await?;
        Ok(())
    }

    /// Remove every pipeline whose id matches `pattern` from the cluster state.
    pub async fn delete_pipeline(&self, pattern: &str) -> Result<()> {
        let owned = pattern.to_string();
        self.cluster_service
            .submit_state_update(
                format!("delete-pipeline-{pattern}"),
                Box::new(move |state| inner_delete(&state.metadata, &owned)),
            )
            .await?;
        Ok(())
    }

    /// Stored configurations of the pipelines named by `ids`, which may contain wildcards. All
    /// pipelines when `ids` is empty.
    pub fn get_pipelines(metadata: &Metadata, ids: &[&str]) -> Vec<Arc<PipelineConfiguration>> {
        let Some(ingest) = &metadata.ingest else {
            return vec![];
        };
        let sorted = |mut configs: Vec<Arc<PipelineConfiguration>>| {
            configs.sort_by(|a, b| a.id.cmp(&b.id));
            configs
        };

        if ids.is_empty() {
            return sorted(ingest.pipelines.values().map(Arc::clone).collect());
        }
        let mut found = vec![];
        for id in ids {
            if is_simple_match_pattern(id) {
                found.extend(sorted(
                    ingest
                        .pipelines
                        .iter()
                        .filter(|(pipeline_id, _)| simple_match(id, pipeline_id))
                        .map(|(_, config)| Arc::clone(config))
                        .collect(),
                ));
            } else if let Some(config) = ingest.get(id) {
                found.push(Arc::clone(config));
            }
        }
        found
    }

    /// Check that `configuration` compiles, respects the pipeline limits and only uses
    /// processors installed on every node in `ingest_infos`.
    pub fn validate_pipeline(
        &self,
        ingest_infos: &BTreeMap<DiscoveryNode, IngestInfo>,
        configuration: &PipelineConfiguration,
    ) -> Result<()> {
        if ingest_infos.is_empty() {
            return Err(Error::IngestInfoEmpty);
        }

        let id = &configuration.id;
        if id.len() > MAX_PIPELINE_ID_BYTES {
            return Err(ConfigurationError::new(format!(
                "Pipeline id [{id}] exceeds maximum length of {MAX_PIPELINE_ID_BYTES} UTF-8 bytes (actual: {} bytes)",
                id.len()
            ))
            .into());
        }

        let config = configuration.config_as_map()?;
        let pipeline = Pipeline::create(id.as_str(), config, &self.processors)?;

        let processors = pipeline.flatten_all_processors();
        let max = self.max_processor_count();
        if processors.len() > max {
            return Err(ConfigurationError::new(format!(
                "Cannot use more than the maximum processors allowed. Number of processors being \
                 configured is [{}] which exceeds the maximum allowed configuration of [{max}] \
                 processors.",
                processors.len()
            ))
            .into());
        }

        let mut errors = vec![];
        for processor in &processors {
            let processor_type = processor.processor_type();
            if processor_type == CONDITIONAL_TYPE {
                continue;
            }
            for (node, info) in ingest_infos {
                if !info.contains_processor(processor_type) {
                    errors.push(ConfigurationError::for_property(
                        Some(processor_type),
                        processor.tag(),
                        None,
                        format!(
                            "Processor type [{processor_type}] is not installed on node [{node}]"
                        ),
                    ));
                }
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::Validation(errors))
        }
    }

    /// Follow a new cluster state: drop cached index based pipelines of indices that went away
    /// or changed, then rebuild the pipelines from the state's pipeline configurations.
    pub fn apply_cluster_state(&self, event: &ClusterChangedEvent) {
        for index in event.removed_or_changed_indices() {
            let key = index.index.to_string();
            debug!(index_key = %key, "invalidating index based pipeline");
            self.cache.invalidate(&key);
        }

        *self.state.write() = Arc::clone(&event.state);
        if event.state.not_recovered {
            return;
        }

        let listeners = self.listeners.read().clone();
        for listener in listeners {
            listener.cluster_state_changed(&event.state);
        }

        let Some(ingest) = &event.state.metadata.ingest else {
            return;
        };
        if let Err(error) = self.registry.update(ingest) {
            warn!(%error, source = %event.source, "failed to update ingest pipelines");
        }
    }
}

impl ClusterStateApplier for IngestService {
    fn apply_cluster_state(&self, event: &ClusterChangedEvent) {
        Self::apply_cluster_state(self, event)
    }
}

fn inner_put(metadata: &Metadata, configuration: Arc<PipelineConfiguration>) -> Metadata {
    let mut ingest = metadata.ingest.clone().unwrap_or_default();
    ingest
        .pipelines
        .insert(configuration.id.clone(), configuration);
    metadata.clone().with_ingest(ingest)
}

fn inner_delete(metadata: &Metadata, pattern: &str) -> Result<Option<Metadata>> {
    let Some(ingest) = &metadata.ingest else {
        return Ok(None);
    };
    let to_remove: Vec<&String> = ingest
        .pipelines
        .keys()
        .filter(|id| simple_match(pattern, id))
        .collect();
    if to_remove.is_empty() {
        if is_match_all_pattern(pattern) {
            return Ok(None);
        }
        return Err(Error::PipelineMissing(pattern.to_string()));
    }

    let mut updated = ingest.clone();
    for id in to_remove {
        updated.pipelines.remove(id);
    }
    Ok(Some(metadata.clone().with_ingest(updated)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::LocalClusterService;
    use ingest_types::{IndexMetadata, IngestMetadata};
    use ingest_test_helpers::{object, processor_registry};
    use iox_time::{MockProvider, Time};
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn config() -> IngestConfig {
        IngestConfig {
            max_processors: NonZeroUsize::MAX,
            batch_size: NonZeroUsize::MIN,
        }
    }

    fn service_with(metadata: Metadata) -> Arc<IngestService> {
        let cluster = Arc::new(LocalClusterService::new(
            DiscoveryNode::new("node-1", "node"),
            ClusterState::new(metadata),
        ));
        IngestService::new(
            config(),
            processor_registry(),
            cluster,
            WorkerPools::default(),
            Arc::new(MockProvider::new(Time::from_timestamp_nanos(0))),
        )
    }

    fn infos(service: &IngestService) -> BTreeMap<DiscoveryNode, IngestInfo> {
        BTreeMap::from([(
            service.cluster_service().local_node().clone(),
            service.info(),
        )])
    }

    fn uppercase(id: &str, field: &str) -> PipelineConfiguration {
        PipelineConfiguration::from_json(id, &json!({"processors": [{"uppercase": {"field": field}}]}))
    }

    fn ids(configs: &[Arc<PipelineConfiguration>]) -> Vec<&str> {
        configs.iter().map(|c| c.id.as_str()).collect()
    }

    #[test_log::test(tokio::test)]
    async fn put_and_delete_pipelines() {
        let service = service_with(Metadata::default());
        let infos = infos(&service);

        service.put_pipeline(&infos, uppercase("p1", "a")).await.unwrap();
        service.put_pipeline(&infos, uppercase("p2", "b")).await.unwrap();
        service.put_pipeline(&infos, uppercase("other", "c")).await.unwrap();
        assert_eq!(service.pipeline_ids(), vec!["other", "p1", "p2"]);
        assert_eq!(service.state().version, 3);

        service.delete_pipeline("p*").await.unwrap();
        assert_eq!(service.pipeline_ids(), vec!["other"]);

        let err = service.delete_pipeline("p1").await.unwrap_err();
        assert_eq!(err.to_string(), "pipeline [p1] is missing");

        service.delete_pipeline("*").await.unwrap();
        assert!(service.pipeline_ids().is_empty());

        // match all on nothing is not an error and changes nothing
        let version = service.state().version;
        service.delete_pipeline("*").await.unwrap();
        assert_eq!(service.state().version, version);
    }

    #[test]
    fn get_pipelines_with_wildcards() {
        let metadata = Metadata::default().with_ingest(
            IngestMetadata::default()
                .with_pipeline(uppercase("p1", "a"))
                .with_pipeline(uppercase("p2", "a"))
                .with_pipeline(uppercase("q1", "a")),
        );

        assert_eq!(ids(&IngestService::get_pipelines(&metadata, &[])), vec!["p1", "p2", "q1"]);
        assert_eq!(ids(&IngestService::get_pipelines(&metadata, &["p*"])), vec!["p1", "p2"]);
        assert_eq!(ids(&IngestService::get_pipelines(&metadata, &["q1", "nope"])), vec!["q1"]);
        assert!(IngestService::get_pipelines(&Metadata::default(), &[]).is_empty());
    }

    #[test_log::test(tokio::test)]
    async fn validation_failures() {
        let service = service_with(Metadata::default());
        let infos = infos(&service);

        let err = service
            .validate_pipeline(&BTreeMap::new(), &uppercase("p1", "a"))
            .unwrap_err();
        assert_eq!(err.to_string(), "Ingest info is empty");

        let long_id = "a".repeat(MAX_PIPELINE_ID_BYTES + 1);
        let err = service
            .put_pipeline(&infos, uppercase(&long_id, "a"))
            .await
            .unwrap_err();
        test_helpers::assert_contains!(
            err.to_string(),
            "exceeds maximum length of 512 UTF-8 bytes (actual: 513 bytes)"
        );
        service
            .validate_pipeline(&infos, &uppercase(&"a".repeat(MAX_PIPELINE_ID_BYTES), "a"))
            .unwrap();

        let err = service
            .validate_pipeline(&infos, &PipelineConfiguration::new("p1", "not json"))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidPipelineSource(_)));

        let err = service
            .validate_pipeline(
                &infos,
                &PipelineConfiguration::from_json("p1", &json!({"processors": [{"nope": {}}]})),
            )
            .unwrap_err();
        assert_eq!(err.to_string(), "No processor type exists with name [nope]");

        // nothing was stored
        assert_eq!(service.state().version, 0);
    }

    #[test]
    fn processor_limit_is_dynamic() {
        let service = service_with(Metadata::default());
        let infos = infos(&service);
        let two = PipelineConfiguration::from_json(
            "p1",
            &json!({"processors": [
                {"uppercase": {"field": "a"}},
                {"set": {"field": "b", "value": 1, "on_failure": [{"set": {"field": "c", "value": 2}}]}},
            ]}),
        );
        service.validate_pipeline(&infos, &two).unwrap();

        service.set_max_processor_count(NonZeroUsize::new(2).unwrap());
        let err = service.validate_pipeline(&infos, &two).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Cannot use more than the maximum processors allowed. Number of processors being \
             configured is [3] which exceeds the maximum allowed configuration of [2] processors."
        );
    }

    #[test]
    fn processors_must_be_installed_everywhere() {
        let service = service_with(Metadata::default());
        let infos = BTreeMap::from([
            (DiscoveryNode::new("id1", "full"), service.info()),
            (DiscoveryNode::new("id2", "partial"), IngestInfo::new(["set"])),
        ]);
        let config = PipelineConfiguration::from_json(
            "p1",
            &json!({"processors": [
                {"uppercase": {"field": "a", "tag": "up"}},
                {"drop": {"if": "x"}},
                {"set": {"field": "b", "value": 1}},
            ]}),
        );

        let Error::Validation(errors) = service.validate_pipeline(&infos, &config).unwrap_err()
        else {
            panic!("expected a validation error");
        };
        let messages: Vec<_> = errors.iter().map(|e| e.message.as_str()).collect();
        // conditionals are not checked, neither is what they wrap
        assert_eq!(
            messages,
            vec!["Processor type [uppercase] is not installed on node [{partial}{id2}]"]
        );
        assert_eq!(errors[0].tag.as_deref(), Some("up"));
    }

    #[test]
    fn validation_reports_every_node_missing_a_processor() {
        let service = service_with(Metadata::default());
        let infos = BTreeMap::from([
            (DiscoveryNode::new("id1", "full"), service.info()),
            (DiscoveryNode::new("id2", "setter"), IngestInfo::new(["set"])),
            (DiscoveryNode::new("id3", "bare"), IngestInfo::new(Vec::<String>::new())),
        ]);
        let config = PipelineConfiguration::from_json(
            "p1",
            &json!({"processors": [
                {"uppercase": {"field": "a"}},
                {"set": {"field": "b", "value": 1}},
            ]}),
        );

        let err = service.validate_pipeline(&infos, &config).unwrap_err();
        let Error::Validation(errors) = &err else {
            panic!("expected a validation error, got {err:?}");
        };
        let messages: Vec<_> = errors.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(
            messages,
            vec![
                "Processor type [uppercase] is not installed on node [{setter}{id2}]",
                "Processor type [uppercase] is not installed on node [{bare}{id3}]",
                "Processor type [set] is not installed on node [{bare}{id3}]",
            ]
        );
        assert_eq!(
            errors.iter().map(|e| e.processor_type.as_deref()).collect::<Vec<_>>(),
            vec![Some("uppercase"), Some("uppercase"), Some("set")]
        );
        // one error message joining every node's failure
        test_helpers::assert_contains!(err.to_string(), "[{setter}{id2}]; ");
        assert!(service.get_pipeline("p1").is_none());
    }

    #[derive(Debug, Default)]
    struct SeenVersions(Mutex<Vec<u64>>);

    impl ClusterStateListener for SeenVersions {
        fn cluster_state_changed(&self, state: &ClusterState) {
            self.0.lock().push(state.version);
        }
    }

    #[test]
    fn apply_cluster_state_rebuilds_pipelines() {
        let service = service_with(Metadata::default());
        let listener = Arc::new(SeenVersions::default());
        service.add_cluster_state_listener(Arc::clone(&listener) as _);

        let previous = service.state();
        let next = Arc::new(previous.next(
            Metadata::default().with_ingest(IngestMetadata::default().with_pipeline(uppercase("p1", "a"))),
        ));
        service.apply_cluster_state(&ClusterChangedEvent::new("test", previous, Arc::clone(&next)));

        assert!(service.get_pipeline("p1").is_some());
        assert!(Arc::ptr_eq(&service.state(), &next));
        assert_eq!(*listener.0.lock(), vec![1]);
    }

    #[test]
    fn not_recovered_state_loads_nothing() {
        let service = service_with(Metadata::default());
        let previous = service.state();
        let mut next = previous.next(
            Metadata::default().with_ingest(IngestMetadata::default().with_pipeline(uppercase("p1", "a"))),
        );
        next.not_recovered = true;
        service.apply_cluster_state(&ClusterChangedEvent::new("test", previous, Arc::new(next)));
        assert!(service.get_pipeline("p1").is_none());
        assert!(service.state().not_recovered);
    }

    #[test]
    fn initial_state_is_applied() {
        let service = service_with(
            Metadata::default().with_ingest(IngestMetadata::default().with_pipeline(uppercase("p1", "a"))),
        );
        assert!(service.get_pipeline("p1").is_some());
    }

    #[test]
    fn changed_indices_invalidate_cached_index_pipelines() {
        let index = IndexMetadata::new("idx")
            .with_mapping(json!({"_meta": {"index_pipeline": {"field": "f", "value": 1}}}));
        let key = index.index.to_string();
        let metadata = Metadata::default()
            .put_index(index.clone())
            .put_index(IndexMetadata::new("untouched"));
        let service = service_with(metadata.clone());

        let mut request = ingest_types::IndexRequest::new("idx");
        service
            .resolver()
            .resolve_pipelines(None, &mut request, &metadata)
            .unwrap();
        assert!(service.index_based_cache().get(&key).is_some());

        let previous = service.state();
        let next = previous.next(
            Metadata::clone(&previous.metadata).put_index(index.next_version()),
        );
        service.apply_cluster_state(&ClusterChangedEvent::new("test", previous, Arc::new(next)));
        assert!(service.index_based_cache().get(&key).is_none());
    }

    #[test]
    fn stats_per_pipeline_and_processor() {
        let service = service_with(Metadata::default().with_ingest(
            IngestMetadata::default().with_pipeline(PipelineConfiguration::from_json(
                "p1",
                &json!({"processors": [
                    {"uppercase": {"field": "a", "tag": "up"}},
                    {"set": {"field": "b", "value": 1, "if": "a"}},
                ]}),
            )),
        ));

        let pipeline = service.get_pipeline("p1").unwrap();
        let mut document = ingest_types::IngestDocument::new("idx", object(json!({"a": "x"})));
        pipeline.execute(&mut document).unwrap();

        let stats = service.stats();
        assert_eq!(stats.pipelines.len(), 1);
        let p1 = &stats.pipelines[0];
        assert_eq!(p1.id, "p1");
        assert_eq!(p1.stats.count, 1);
        let names: Vec<_> = p1
            .processors
            .iter()
            .map(|p| (p.name.as_str(), p.processor_type.as_str(), p.stats.count))
            .collect();
        assert_eq!(names, vec![("uppercase:up", "uppercase", 1), ("set", "conditional", 1)]);
    }

    #[test]
    fn info_lists_installed_processors() {
        let service = service_with(Metadata::default());
        let info = service.info();
        for processor_type in ["uppercase", "set", "fail", "drop", "set_index"] {
            assert!(info.contains_processor(processor_type));
        }
    }
}
