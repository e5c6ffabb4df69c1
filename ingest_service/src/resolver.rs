//! Works out which pipelines apply to an index request.
//!
//! Up to three pipelines apply to a document: the default pipeline (named on the request, or
//! configured for the target index), the final pipeline configured for the target index, and
//! the index based pipeline synthesized from the index's mappings. They are looked up, in order
//! of preference, on the existing target index, on the composable (v2) template that would
//! create it, or on the legacy (v1) templates that would create it.

use std::sync::Arc;

use ingest_cache::IndexBasedPipelineCache;
use ingest_pipeline::{
    ConfigurationError, IndexBasedPipelineConfig, NOOP_PIPELINE_NAME, Pipeline, ProcessorRegistry,
};
use ingest_types::{IndexMetadata, IndexRequest, IndexTemplateMetadata, Metadata};
use observability_deps::tracing::debug;

use crate::error::Result;

/// True if `id` does not name a pipeline.
pub fn is_noop(id: Option<&str>) -> bool {
    id.is_none_or(|id| id == NOOP_PIPELINE_NAME)
}

/// Where the pipeline settings of a request's target index come from.
#[derive(Debug)]
enum IndexSource<'a> {
    Existing(&'a Arc<IndexMetadata>),
    /// Name of the composable template the index would be created from.
    ComposableTemplate(&'a str),
    /// Matching legacy templates, highest order first.
    LegacyTemplates(Vec<&'a IndexTemplateMetadata>),
}

impl<'a> IndexSource<'a> {
    /// Existing indices are looked up by the original item's index, then through the write
    /// index of the request's target, then through the write index of the original item's
    /// target.
    fn find(original_index: Option<&str>, request_index: &str, metadata: &'a Metadata) -> Self {
        let existing = original_index
            .and_then(|name| metadata.index(name))
            .or_else(|| metadata.write_index(request_index))
            .or_else(|| original_index.and_then(|name| metadata.write_index(name)));
        if let Some(index) = existing {
            return Self::Existing(index);
        }
        match metadata.find_v2_template(request_index) {
            Some(template) => Self::ComposableTemplate(template),
            None => Self::LegacyTemplates(metadata.find_v1_templates(request_index)),
        }
    }
}

#[derive(Debug)]
pub struct PipelineResolver {
    processors: Arc<ProcessorRegistry>,
    cache: Arc<IndexBasedPipelineCache>,
}

impl PipelineResolver {
    pub fn new(processors: Arc<ProcessorRegistry>, cache: Arc<IndexBasedPipelineCache>) -> Self {
        Self { processors, cache }
    }

    /// Resolve the default, final and index based pipelines of `request` and record them on it.
    ///
    /// `original_index` is the index the bulk item was addressed to, which differs from the
    /// request's index for updates. A pipeline named on the request overrides the default
    /// pipeline. Unset pipelines are recorded as [`NOOP_PIPELINE_NAME`]. Resolution happens once
    /// per request; clear [`IndexRequest::pipeline_resolved`] to force it again.
    ///
    /// Returns whether any pipeline applies to the request.
    pub fn resolve_pipelines(
        &self,
        original_index: Option<&str>,
        request: &mut IndexRequest,
        metadata: &Metadata,
    ) -> Result<bool> {
        if !request.pipeline_resolved {
            let request_pipeline = request.pipeline.take();
            request.pipeline = Some(NOOP_PIPELINE_NAME.to_string());
            request.final_pipeline = Some(NOOP_PIPELINE_NAME.to_string());
            request.index_based_pipeline = Some(NOOP_PIPELINE_NAME.to_string());

            let source = IndexSource::find(original_index, &request.index, metadata);
            let (default_pipeline, final_pipeline) = match &source {
                IndexSource::Existing(index) => (
                    index.settings.default_pipeline.clone(),
                    index.settings.final_pipeline.clone(),
                ),
                IndexSource::ComposableTemplate(name) => {
                    // a composable template replaces legacy templates entirely
                    let settings = metadata.resolve_settings(name);
                    (settings.default_pipeline, settings.final_pipeline)
                }
                IndexSource::LegacyTemplates(templates) => {
                    let mut default_pipeline = None;
                    let mut final_pipeline = None;
                    for template in templates {
                        if default_pipeline.is_none() {
                            default_pipeline.clone_from(&template.settings.default_pipeline);
                        }
                        if final_pipeline.is_none() {
                            final_pipeline.clone_from(&template.settings.final_pipeline);
                        }
                        if default_pipeline.is_some() && final_pipeline.is_some() {
                            break;
                        }
                    }
                    (default_pipeline, final_pipeline)
                }
            };
            if let Some(id) = default_pipeline {
                request.pipeline = Some(id);
            }
            if let Some(id) = final_pipeline {
                request.final_pipeline = Some(id);
            }

            self.resolve_from_source(&source, request, metadata)?;

            if let Some(id) = request_pipeline {
                request.pipeline = Some(id);
            }
            request.pipeline_resolved = true;
        }

        Ok(!is_noop(request.pipeline.as_deref())
            || !is_noop(request.final_pipeline.as_deref())
            || !is_noop(request.index_based_pipeline.as_deref()))
    }

    /// Resolve only the index based pipeline of `request`, leaving its other pipelines alone.
    ///
    /// The request's index based pipeline is left untouched when the synthesized pipeline has no
    /// processors.
    pub fn resolve_index_based_pipeline(
        &self,
        original_index: Option<&str>,
        request: &mut IndexRequest,
        metadata: &Metadata,
    ) -> Result<()> {
        let source = IndexSource::find(original_index, &request.index, metadata);
        self.resolve_from_source(&source, request, metadata)
    }

    fn resolve_from_source(
        &self,
        source: &IndexSource<'_>,
        request: &mut IndexRequest,
        metadata: &Metadata,
    ) -> Result<()> {
        match source {
            IndexSource::Existing(index) => {
                let key = index.index.to_string();
                self.resolve_cached(request, key, || {
                    IndexBasedPipelineConfig::from_index_mapping(index.mapping.clone())
                })
            }
            IndexSource::ComposableTemplate(name) => {
                // the index does not exist yet: key by the bulk that will create it
                let key = format!("[{}/{}]", request.index, request.bulk_id);
                self.resolve_cached(request, key, || {
                    IndexBasedPipelineConfig::from_template_mappings(metadata.collect_mappings(name))
                })
            }
            IndexSource::LegacyTemplates(templates) => {
                let key = format!("[{}/{}]", request.index, request.bulk_id);
                self.resolve_cached(request, key, || {
                    IndexBasedPipelineConfig::from_template_mappings(
                        templates.iter().filter_map(|t| t.mappings.clone()).collect(),
                    )
                })
            }
        }
    }

    /// Point `request` at the index based pipeline cached under `key`, building and caching it
    /// first if needed. Pipelines without processors are cached but not recorded on the request.
    fn resolve_cached(
        &self,
        request: &mut IndexRequest,
        key: String,
        config: impl FnOnce() -> IndexBasedPipelineConfig,
    ) -> Result<()> {
        let pipeline = match self.cache.get(&key) {
            Some(pipeline) => pipeline,
            None => {
                let pipeline = Arc::new(Pipeline::create_index_based(
                    &key,
                    &self.processors,
                    &config(),
                )?);
                self.cache
                    .cache_pipeline(&key, Arc::clone(&pipeline))
                    .map_err(ConfigurationError::from)?;
                debug!(index_key = %key, n_processors = pipeline.processor_count(), "cached index based pipeline");
                pipeline
            }
        };
        if !pipeline.is_empty() {
            request.index_based_pipeline = Some(key);
        }
        Ok(())
    }
}
