//! Batched execution of bulk items through their pipeline chains.
//!
//! Every index request of a bulk carries up to three resolved pipeline ids (see
//! [`PipelineResolver`](crate::resolver::PipelineResolver)). They are turned into a chain per
//! item, items sharing a target index and chain are grouped into batches, and each batch walks
//! its chain one pipeline at a time on the worker pool. A pipeline that moves a document to
//! another index ends that document's chain; it is resolved again against the new index and
//! continues with the final pipeline of that index.
//!
//! Every item is reported exactly once (failed, dropped or done) and the bulk's completion
//! callback fires once all of them are.

use std::collections::VecDeque;
use std::fmt::Debug;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::Thread;
use std::time::Instant;

use indexmap::IndexMap;
use ingest_pipeline::{NOOP_PIPELINE_NAME, Pipeline, ProcessorError, ProcessorOutcome};
use ingest_types::{DocWriteRequest, IndexRequest, IngestDocument};
use observability_deps::tracing::{debug, warn};
use parking_lot::Mutex;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::resolver::is_noop;
use crate::service::IngestService;

/// Receives the outcome of a bulk submitted to [`IngestService::execute_bulk_request`].
pub trait BulkListener: Debug + Send + Sync + 'static {
    /// The item in `slot` failed and will not be indexed.
    fn on_failure(&self, slot: usize, error: Error);

    /// A processor dropped the document in `slot`.
    fn on_dropped(&self, slot: usize);

    /// All items are done. `thread` is the pool worker the bulk was dispatched on, or the
    /// calling thread when the bulk could not be run at all, in which case `error` is set.
    /// Called exactly once.
    fn on_completion(&self, thread: Thread, error: Option<Error>);
}

/// The items of a bulk. Each item sits in its own slot and is modified in place by the
/// pipelines it runs through.
#[derive(Debug)]
pub struct BulkItems {
    bulk_id: Uuid,
    batch_size: Option<NonZeroUsize>,
    slots: Vec<Mutex<DocWriteRequest>>,
}

impl BulkItems {
    /// Stamps a fresh bulk id on every index request.
    pub fn new(requests: impl IntoIterator<Item = DocWriteRequest>) -> Self {
        let bulk_id = Uuid::new_v4();
        let slots = requests
            .into_iter()
            .map(|mut request| {
                if let Some(index_request) = request.index_write_request_mut() {
                    index_request.bulk_id = bulk_id;
                }
                Mutex::new(request)
            })
            .collect();
        Self {
            bulk_id,
            batch_size: None,
            slots,
        }
    }

    /// Override the configured batch size for this bulk.
    pub fn with_batch_size(mut self, batch_size: NonZeroUsize) -> Self {
        self.batch_size = Some(batch_size);
        self
    }

    pub fn bulk_id(&self) -> Uuid {
        self.bulk_id
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// A copy of the item in `slot`.
    pub fn get(&self, slot: usize) -> Option<DocWriteRequest> {
        self.slots.get(slot).map(|request| request.lock().clone())
    }

    /// A copy of every item, in slot order.
    pub fn requests(&self) -> Vec<DocWriteRequest> {
        self.slots.iter().map(|request| request.lock().clone()).collect()
    }
}

/// Outcome of [`IngestService::resolve_bulk_pipelines`].
#[derive(Debug, Default)]
pub struct BulkResolution {
    /// Whether any item has a pipeline to run.
    pub has_pipelines: bool,
    /// Items whose pipelines could not be resolved. They should not be executed.
    pub failures: Vec<(usize, Error)>,
}

/// Counts down the items of a bulk and fires its completion callback at zero.
#[derive(Debug)]
struct CompletionCounter {
    remaining: AtomicUsize,
    listener: Arc<dyn BulkListener>,
    worker_thread: Thread,
}

impl CompletionCounter {
    fn new(items: usize, listener: Arc<dyn BulkListener>, worker_thread: Thread) -> Self {
        Self {
            remaining: AtomicUsize::new(items),
            listener,
            worker_thread,
        }
    }

    fn complete(&self, n: usize) {
        if n == 0 {
            return;
        }
        let previous = self.remaining.fetch_sub(n, Ordering::AcqRel);
        debug_assert!(previous >= n, "completed {n} items with only {previous} left");
        if previous == n {
            self.listener
                .on_completion(self.worker_thread.clone(), None);
        }
    }
}

#[derive(Debug)]
struct BulkExecution {
    items: Arc<BulkItems>,
    counter: CompletionCounter,
    batch_size: NonZeroUsize,
}

impl BulkExecution {
    fn listener(&self) -> &dyn BulkListener {
        self.counter.listener.as_ref()
    }

    /// `index/id` of each item in `slots`, for logging.
    fn describe(&self, slots: &[usize]) -> Vec<String> {
        slots
            .iter()
            .filter_map(|slot| {
                let request = self.items.slots[*slot].lock();
                request.index_write_request().map(describe_request)
            })
            .collect()
    }
}

fn describe_request(request: &IndexRequest) -> String {
    format!("{}/{}", request.index, request.id.as_deref().unwrap_or("_auto"))
}

/// An item ready to run, with the chain of pipelines it goes through.
#[derive(Debug, Clone, PartialEq, Eq)]
struct IndexRequestWrapper {
    slot: usize,
    index: String,
    pipelines: Vec<String>,
    has_final_pipeline: bool,
    /// The index based pipeline still to be applied, if any.
    index_based_pipeline: Option<String>,
}

fn take_pipeline(id: &mut Option<String>) -> Option<String> {
    id.replace(NOOP_PIPELINE_NAME.to_string())
        .filter(|taken| !is_noop(Some(taken.as_str())))
}

/// Take the resolved pipelines off `request` and turn them into its chain: the default
/// pipeline, then the final pipeline. Without a final pipeline the index based pipeline takes
/// its place; otherwise it is merged into the final pipeline when that runs.
fn derive_chain(slot: usize, request: &mut IndexRequest) -> Option<IndexRequestWrapper> {
    let default_pipeline = take_pipeline(&mut request.pipeline);
    let final_pipeline = take_pipeline(&mut request.final_pipeline);
    let index_based_pipeline = take_pipeline(&mut request.index_based_pipeline);

    let mut pipelines: Vec<String> = default_pipeline.into_iter().collect();
    let mut has_final_pipeline = false;
    if let Some(id) = final_pipeline {
        pipelines.push(id);
        has_final_pipeline = true;
    } else if let Some(id) = &index_based_pipeline {
        pipelines.push(id.clone());
        has_final_pipeline = true;
    }

    if pipelines.is_empty() {
        return None;
    }
    Some(IndexRequestWrapper {
        slot,
        index: request.index.clone(),
        pipelines,
        has_final_pipeline,
        index_based_pipeline,
    })
}

/// Group items by target index and chain, keeping first-seen order, and split each group into
/// batches of at most `batch_size` items.
fn prepare_batches(
    batch_size: NonZeroUsize,
    wrappers: Vec<IndexRequestWrapper>,
) -> Vec<Vec<IndexRequestWrapper>> {
    let mut groups: IndexMap<(String, Vec<String>), Vec<IndexRequestWrapper>> = IndexMap::new();
    for wrapper in wrappers {
        groups
            .entry((wrapper.index.clone(), wrapper.pipelines.clone()))
            .or_default()
            .push(wrapper);
    }

    let mut batches = vec![];
    for (_, group) in groups {
        let mut group = group.into_iter().peekable();
        while group.peek().is_some() {
            batches.push(group.by_ref().take(batch_size.get()).collect());
        }
    }
    batches
}

/// A batch at some point of its chain.
#[derive(Debug)]
struct ChainTask {
    slots: Vec<usize>,
    /// Pipelines not yet run.
    chain: VecDeque<String>,
    has_final_pipeline: bool,
    index_based_pipeline: Option<String>,
}

impl ChainTask {
    /// The chain and its flags are taken from the batch's first item; all items of a batch
    /// share them.
    fn from_batch(batch: Vec<IndexRequestWrapper>) -> Option<Self> {
        let mut batch = batch.into_iter();
        let first = batch.next()?;
        let slots = std::iter::once(first.slot)
            .chain(batch.map(|wrapper| wrapper.slot))
            .collect();
        Some(Self {
            slots,
            chain: first.pipelines.into(),
            has_final_pipeline: first.has_final_pipeline,
            index_based_pipeline: first.index_based_pipeline,
        })
    }
}

/// What happened to one document in one step of its chain.
#[derive(Debug)]
enum DocumentStep {
    /// Carry on with the rest of the chain.
    Continue,
    /// The document moved to another index and continues with this chain instead.
    Rerouted(IndexRequestWrapper),
    /// Nothing is left to run for the document.
    Done,
    Dropped,
    Failed { document: String, error: Error },
}

impl IngestService {
    /// Run the index requests of `items` through their pipelines on the worker pool named
    /// `executor_name` and report the outcome to `listener`. Returns immediately.
    ///
    /// Pipelines must have been resolved on the items beforehand, see
    /// [`Self::resolve_bulk_pipelines`].
    pub fn execute_bulk_request(
        self: &Arc<Self>,
        items: Arc<BulkItems>,
        listener: Arc<dyn BulkListener>,
        executor_name: &str,
    ) {
        let Some(handle) = self.pools.handle(executor_name) else {
            warn!(executor = executor_name, "cannot run bulk on unknown worker pool");
            listener.on_completion(
                std::thread::current(),
                Some(Error::UnknownExecutor(executor_name.to_string())),
            );
            return;
        };

        let service = Arc::clone(self);
        handle.spawn(async move {
            let worker_thread = std::thread::current();
            service.run_bulk_request_in_batch(items, listener, worker_thread);
        });
    }

    /// Resolve the pipelines of every index request in `items` against the current cluster
    /// state.
    pub fn resolve_bulk_pipelines(&self, items: &BulkItems) -> BulkResolution {
        let state = self.state();
        let mut resolution = BulkResolution::default();
        for (slot, request) in items.slots.iter().enumerate() {
            let mut request = request.lock();
            let original_index = request.index().to_string();
            let Some(index_request) = request.index_write_request_mut() else {
                continue;
            };
            match self.resolver.resolve_pipelines(
                Some(&original_index),
                index_request,
                &state.metadata,
            ) {
                Ok(has_pipelines) => resolution.has_pipelines |= has_pipelines,
                Err(error) => resolution.failures.push((slot, error)),
            }
        }
        resolution
    }

    fn run_bulk_request_in_batch(
        self: &Arc<Self>,
        items: Arc<BulkItems>,
        listener: Arc<dyn BulkListener>,
        worker_thread: Thread,
    ) {
        let n = items.len();
        if n == 0 {
            listener.on_completion(worker_thread, None);
            return;
        }

        let mut wrappers = Vec::with_capacity(n);
        let mut skipped = 0;
        for (slot, request) in items.slots.iter().enumerate() {
            let mut request = request.lock();
            match request
                .index_write_request_mut()
                .and_then(|index_request| derive_chain(slot, index_request))
            {
                Some(wrapper) => wrappers.push(wrapper),
                None => skipped += 1,
            }
        }

        let configured = items.batch_size.unwrap_or(self.config.batch_size);
        let batch_size = NonZeroUsize::new(configured.get().min(n)).unwrap_or(NonZeroUsize::MIN);
        let batches = prepare_batches(batch_size, wrappers);
        debug!(
            batch_size = batch_size.get(),
            n_batches = batches.len(),
            n_items = n,
            "executing bulk pipelines"
        );

        let execution = Arc::new(BulkExecution {
            items,
            counter: CompletionCounter::new(n, listener, worker_thread),
            batch_size,
        });
        execution.counter.complete(skipped);

        for task in batches.into_iter().filter_map(ChainTask::from_batch) {
            let service = Arc::clone(self);
            let execution = Arc::clone(&execution);
            tokio::spawn(async move { service.run_chain(&execution, task) });
        }
    }

    /// Drive `task` and the tasks it turns into until every item involved is done.
    fn run_chain(&self, execution: &BulkExecution, task: ChainTask) {
        let mut queue = VecDeque::from([task]);
        while let Some(task) = queue.pop_front() {
            queue.extend(self.execute_step(execution, task));
        }
    }

    /// Run the next pipeline of `task` over its documents and return what follows.
    fn execute_step(&self, execution: &BulkExecution, mut task: ChainTask) -> Vec<ChainTask> {
        let Some(pipeline_id) = task.chain.pop_front() else {
            execution.counter.complete(task.slots.len());
            return vec![];
        };
        let is_final = task.has_final_pipeline && task.chain.is_empty();

        let pipeline = match self.pipeline_for_step(execution, &task, &pipeline_id, is_final) {
            Ok(Some(pipeline)) => pipeline,
            Ok(None) => {
                execution.counter.complete(task.slots.len());
                return vec![];
            }
            Err(error) => {
                debug!(
                    %pipeline_id,
                    %error,
                    documents = ?execution.describe(&task.slots),
                    "failed to execute pipeline"
                );
                for slot in &task.slots {
                    execution.listener().on_failure(*slot, error.clone());
                }
                execution.counter.complete(task.slots.len());
                return vec![];
            }
        };

        let mut continuing = vec![];
        let mut rerouted = vec![];
        let mut finished = 0;
        for slot in std::mem::take(&mut task.slots) {
            match self.step_document(execution, slot, &pipeline, &pipeline_id, is_final) {
                DocumentStep::Continue => continuing.push(slot),
                DocumentStep::Rerouted(wrapper) => rerouted.push(wrapper),
                DocumentStep::Done => finished += 1,
                DocumentStep::Dropped => {
                    execution.listener().on_dropped(slot);
                    finished += 1;
                }
                DocumentStep::Failed { document, error } => {
                    debug!(%pipeline_id, %error, %document, "failed to execute pipeline");
                    execution.listener().on_failure(slot, error);
                    finished += 1;
                }
            }
        }
        execution.counter.complete(finished);

        let mut next = vec![];
        if !continuing.is_empty() {
            task.slots = continuing;
            next.push(task);
        }
        next.extend(
            prepare_batches(execution.batch_size, rerouted)
                .into_iter()
                .filter_map(ChainTask::from_batch),
        );
        next
    }

    /// The pipeline to run for `pipeline_id`, or `None` when nothing is left to run.
    ///
    /// The last pipeline of a chain ending in a final pipeline also applies the pending index
    /// based pipeline: on its own when it is the final pipeline, otherwise merged after the
    /// final pipeline's processors. An index based pipeline missing from the cache is resolved
    /// again once.
    fn pipeline_for_step(
        &self,
        execution: &BulkExecution,
        task: &ChainTask,
        pipeline_id: &str,
        is_final: bool,
    ) -> Result<Option<Arc<Pipeline>>> {
        let registered = || {
            self.registry
                .pipeline(pipeline_id)
                .ok_or_else(|| Error::PipelineNotFound(pipeline_id.to_string()))
        };
        let pending = match &task.index_based_pipeline {
            Some(pending) if is_final => pending.as_str(),
            _ => return registered().map(Some),
        };

        let index_pipeline = match self.cache.get(pending) {
            Some(pipeline) => Some(pipeline),
            None => self.re_resolve_index_based(execution, task.slots[0])?,
        };
        match index_pipeline {
            Some(index_pipeline) if pipeline_id == pending => Ok(Some(index_pipeline)),
            Some(index_pipeline) => Ok(Some(Arc::new(registered()?.merge(&index_pipeline)))),
            None if pipeline_id == pending => Ok(None),
            None => registered().map(Some),
        }
    }

    /// Resolve the index based pipeline of the item in `slot` from scratch.
    fn re_resolve_index_based(
        &self,
        execution: &BulkExecution,
        slot: usize,
    ) -> Result<Option<Arc<Pipeline>>> {
        let mut guard = execution.items.slots[slot].lock();
        let Some(request) = guard.index_write_request_mut() else {
            return Ok(None);
        };
        request.index_based_pipeline = Some(NOOP_PIPELINE_NAME.to_string());
        let state = self.state();
        self.resolver
            .resolve_index_based_pipeline(None, request, &state.metadata)?;

        match take_pipeline(&mut request.index_based_pipeline) {
            None => Ok(None),
            Some(id) => {
                debug!(index_key = %id, "re-resolved index based pipeline");
                self.cache
                    .get(&id)
                    .map(Some)
                    .ok_or(Error::IndexBasedPipelineNotFound(id))
            }
        }
    }

    fn step_document(
        &self,
        execution: &BulkExecution,
        slot: usize,
        pipeline: &Pipeline,
        pipeline_id: &str,
        is_final: bool,
    ) -> DocumentStep {
        let mut guard = execution.items.slots[slot].lock();
        let Some(request) = guard.index_write_request_mut() else {
            return DocumentStep::Done;
        };

        let original_index = request.index.clone();
        let mut document = IngestDocument::from_request(request);
        match self.execute_pipeline(pipeline, &mut document) {
            Err(source) => {
                return DocumentStep::Failed {
                    document: describe_request(request),
                    error: Error::Execution {
                        pipeline_id: pipeline_id.to_string(),
                        source,
                    },
                };
            }
            Ok(ProcessorOutcome::Dropped) => return DocumentStep::Dropped,
            Ok(ProcessorOutcome::Continue) => document.apply_to(request),
        }

        if request.index == original_index {
            return DocumentStep::Continue;
        }
        if is_final {
            self.total_metrics.failed();
            return DocumentStep::Failed {
                document: describe_request(request),
                error: Error::FinalPipelineChangedIndex(pipeline_id.to_string()),
            };
        }

        debug!(
            from = %original_index,
            to = %request.index,
            pipeline_id,
            "document changed target index"
        );
        match self.rerouted_chain(slot, request) {
            Ok(Some(wrapper)) => DocumentStep::Rerouted(wrapper),
            Ok(None) => DocumentStep::Done,
            Err(error) => DocumentStep::Failed {
                document: describe_request(request),
                error,
            },
        }
    }

    /// Run `pipeline` over `document`, counting it in the node's total metrics.
    fn execute_pipeline(
        &self,
        pipeline: &Pipeline,
        document: &mut IngestDocument,
    ) -> Result<ProcessorOutcome, ProcessorError> {
        if pipeline.is_empty() {
            return Ok(ProcessorOutcome::Continue);
        }
        self.total_metrics.before();
        let start = Instant::now();
        let result = pipeline.execute(document);
        self.total_metrics.after(start.elapsed());
        if result.is_err() {
            self.total_metrics.failed();
        }
        result
    }

    /// Resolve `request` against its new index. Only the final pipeline of the new index runs,
    /// or its index based pipeline in place of a final one.
    fn rerouted_chain(
        &self,
        slot: usize,
        request: &mut IndexRequest,
    ) -> Result<Option<IndexRequestWrapper>> {
        request.pipeline_resolved = false;
        let state = self.state();
        self.resolver
            .resolve_pipelines(None, request, &state.metadata)?;

        take_pipeline(&mut request.pipeline);
        let final_pipeline = take_pipeline(&mut request.final_pipeline);
        let index_based_pipeline = take_pipeline(&mut request.index_based_pipeline);

        let Some(id) = final_pipeline.or_else(|| index_based_pipeline.clone()) else {
            return Ok(None);
        };
        Ok(Some(IndexRequestWrapper {
            slot,
            index: request.index.clone(),
            pipelines: vec![id],
            has_final_pipeline: true,
            index_based_pipeline,
        }))
    }
}
