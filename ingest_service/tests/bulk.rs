use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::Thread;
use std::time::Duration;

use ingest_clap_blocks::ingest::IngestConfig;
use ingest_service::{
    BulkItems, BulkListener, ClusterService, Error, IngestService, LocalClusterService,
    WorkerPools,
};
use ingest_test_helpers::processor_registry;
use ingest_types::{
    ClusterState, DiscoveryNode, DocWriteRequest, IndexMetadata, IndexRequest, IndexSettings,
    Metadata, PipelineConfiguration,
};
use iox_time::{MockProvider, Time};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::runtime::Handle;
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct RecordingListener {
    failures: Mutex<Vec<(usize, String)>>,
    dropped: AtomicUsize,
    completions: AtomicUsize,
    done: Notify,
}

impl BulkListener for RecordingListener {
    fn on_failure(&self, slot: usize, error: Error) {
        self.failures.lock().push((slot, error.to_string()));
    }

    fn on_dropped(&self, _slot: usize) {
        self.dropped.fetch_add(1, Ordering::SeqCst);
    }

    fn on_completion(&self, _thread: Thread, error: Option<Error>) {
        assert!(error.is_none(), "bulk failed: {error:?}");
        self.completions.fetch_add(1, Ordering::SeqCst);
        self.done.notify_one();
    }
}

fn document(index: &str, id: &str) -> DocWriteRequest {
    IndexRequest::new(index)
        .with_id(id)
        .with_source(json!({"name": "ingest"}))
        .into()
}

#[test_log::test(tokio::test)]
async fn bulk_through_default_pipeline() {
    let metadata = Metadata::default()
        .put_index(IndexMetadata::new("a"))
        .put_index(
            IndexMetadata::new("b")
                .with_settings(IndexSettings::default().with_default_pipeline("p1")),
        );
    let node = DiscoveryNode::new("node-1", "node");
    let cluster = Arc::new(LocalClusterService::new(
        node.clone(),
        ClusterState::new(metadata),
    ));
    let service = IngestService::new(
        IngestConfig {
            max_processors: NonZeroUsize::MAX,
            batch_size: NonZeroUsize::new(2).unwrap(),
        },
        processor_registry(),
        Arc::clone(&cluster) as Arc<dyn ClusterService>,
        WorkerPools::default().with_pool("write", Handle::current()),
        Arc::new(MockProvider::new(Time::from_timestamp_nanos(0))),
    );

    let infos = BTreeMap::from([(node, service.info())]);
    service
        .put_pipeline(
            &infos,
            PipelineConfiguration::from_json(
                "p1",
                &json!({"processors": [{"uppercase": {"field": "name"}}]}),
            ),
        )
        .await
        .unwrap();
    assert!(service.get_pipeline("p1").is_some());

    let items = Arc::new(BulkItems::new([
        document("a", "1"),
        document("b", "2"),
        document("a", "3"),
    ]));
    let resolution = service.resolve_bulk_pipelines(&items);
    assert!(resolution.has_pipelines);
    assert!(resolution.failures.is_empty());

    let listener = Arc::new(RecordingListener::default());
    service.execute_bulk_request(Arc::clone(&items), Arc::clone(&listener) as _, "write");
    tokio::time::timeout(Duration::from_secs(10), listener.done.notified())
        .await
        .expect("bulk completed");
    tokio::task::yield_now().await;

    assert_eq!(listener.completions.load(Ordering::SeqCst), 1);
    assert!(listener.failures.lock().is_empty());
    assert_eq!(listener.dropped.load(Ordering::SeqCst), 0);

    let names: Vec<Value> = items
        .requests()
        .iter()
        .map(|request| request.index_write_request().unwrap().source["name"].clone())
        .collect();
    assert_eq!(names, vec![json!("ingest"), json!("INGEST"), json!("ingest")]);

    let stats = service.stats();
    assert_eq!(stats.total.count, 1);
    assert_eq!(stats.pipelines[0].id, "p1");
    assert_eq!(stats.pipelines[0].processors[0].stats.count, 1);
}
