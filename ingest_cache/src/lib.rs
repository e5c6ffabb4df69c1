//! An in-memory cache of the pipelines synthesized for individual indices.
//!
//! Keys are index identifiers of the form `[name/uuid]` for existing indices, or
//! `[name/bulk-id]` for indices that a bulk will create from templates. The cache is bounded in
//! both size and age: inserting into a full cache evicts the least recently used entry together
//! with every expired entry, and expired entries are also dropped when they are looked up.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use ingest_pipeline::{ConfigurationError, Pipeline};
use iox_time::TimeProvider;
use observability_deps::tracing::debug;

/// Number of entries at which an insert triggers eviction.
pub const MAX_ENTRIES: usize = 100;
/// Age after which an entry is no longer served.
pub const EXPIRES_IN: Duration = Duration::from_secs(60 * 60);
/// Largest number of top-level processors an index based pipeline may have.
pub const MAX_PROCESSOR_NUMBER: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CacheError {
    #[error(
        "Too many index based ingest processors for index: {index_key} ({count} > {max})",
        max = MAX_PROCESSOR_NUMBER
    )]
    TooManyProcessors { index_key: String, count: usize },
}

impl From<CacheError> for ConfigurationError {
    fn from(e: CacheError) -> Self {
        Self::new(e.to_string())
    }
}

pub type Result<T, E = CacheError> = std::result::Result<T, E>;

#[derive(Debug)]
struct CacheEntry {
    pipeline: Arc<Pipeline>,
    /// Nanosecond timestamp of insertion
    created_at: i64,
    /// Nanosecond timestamp of the last successful lookup, or of insertion
    last_access: AtomicI64,
}

impl CacheEntry {
    fn is_expired(&self, now: i64) -> bool {
        now.saturating_sub(self.created_at) > EXPIRES_IN.as_nanos() as i64
    }
}

#[derive(Debug)]
pub struct IndexBasedPipelineCache {
    map: DashMap<String, CacheEntry>,
    time_provider: Arc<dyn TimeProvider>,
}

impl IndexBasedPipelineCache {
    pub fn new(time_provider: Arc<dyn TimeProvider>) -> Self {
        Self {
            map: DashMap::new(),
            time_provider,
        }
    }

    fn now(&self) -> i64 {
        self.time_provider.now().timestamp_nanos()
    }

    /// Cache `pipeline` for the index identified by `index_key`, replacing any previous entry.
    ///
    /// Eviction on a full cache removes a single least recently used entry per insert, so
    /// concurrent inserts can briefly push the size past [`MAX_ENTRIES`].
    pub fn cache_pipeline(&self, index_key: &str, pipeline: Arc<Pipeline>) -> Result<()> {
        let count = pipeline.processor_count();
        if count > MAX_PROCESSOR_NUMBER {
            return Err(CacheError::TooManyProcessors {
                index_key: index_key.to_string(),
                count,
            });
        }
        if self.map.len() >= MAX_ENTRIES {
            self.evict_oldest_and_expired();
        }
        let now = self.now();
        self.map.insert(
            index_key.to_string(),
            CacheEntry {
                pipeline,
                created_at: now,
                last_access: AtomicI64::new(now),
            },
        );
        Ok(())
    }

    /// Remove the least recently used entry and every expired entry.
    fn evict_oldest_and_expired(&self) {
        let now = self.now();
        let mut oldest: Option<(i64, String)> = None;
        let mut expired = vec![];

        // collect first: removing while iterating would deadlock on the shard locks
        for entry in self.map.iter() {
            let last_access = entry.last_access.load(Ordering::SeqCst);
            if oldest.as_ref().is_none_or(|(t, _)| last_access < *t) {
                oldest = Some((last_access, entry.key().clone()));
            }
            if entry.is_expired(now) {
                expired.push(entry.key().clone());
            }
        }

        if let Some((_, key)) = oldest {
            debug!(index_key = %key, "evicting least recently used index based pipeline");
            self.map.remove(&key);
        }
        if !expired.is_empty() {
            debug!(n_expired = expired.len(), "evicting expired index based pipelines");
        }
        for key in expired {
            self.map.remove(&key);
        }
    }

    /// Look up the pipeline cached for `index_key`, refreshing its last access time.
    ///
    /// An expired entry is removed and reported as absent.
    pub fn get(&self, index_key: &str) -> Option<Arc<Pipeline>> {
        let now = self.now();
        if self
            .map
            .remove_if(index_key, |_, entry| entry.is_expired(now))
            .is_some()
        {
            debug!(index_key, "index based pipeline expired");
            return None;
        }
        let entry = self.map.get(index_key)?;
        entry.last_access.store(now, Ordering::SeqCst);
        Some(Arc::clone(&entry.pipeline))
    }

    pub fn invalidate(&self, index_key: &str) {
        self.map.remove(index_key);
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ingest_test_helpers::pipeline_with_processors;
    use iox_time::{MockProvider, Time};

    fn cache() -> (Arc<MockProvider>, IndexBasedPipelineCache) {
        let time_provider = Arc::new(MockProvider::new(Time::from_timestamp_nanos(0)));
        let cache = IndexBasedPipelineCache::new(Arc::clone(&time_provider) as _);
        (time_provider, cache)
    }

    #[test]
    fn cache_and_retrieve() {
        let (_, cache) = cache();
        let pipeline = Arc::new(pipeline_with_processors("index_pipeline", 2));
        cache
            .cache_pipeline("[index/uuid]", Arc::clone(&pipeline))
            .unwrap();

        let cached = cache.get("[index/uuid]").unwrap();
        assert!(Arc::ptr_eq(&cached, &pipeline));
        assert!(cache.get("[other/uuid]").is_none());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn too_many_processors_rejected() {
        let (_, cache) = cache();
        let pipeline = Arc::new(pipeline_with_processors("index_pipeline", 11));
        let err = cache.cache_pipeline("[index/uuid]", pipeline).unwrap_err();
        test_helpers::assert_contains!(
            err.to_string(),
            "Too many index based ingest processors for index: [index/uuid]"
        );
        assert!(cache.get("[index/uuid]").is_none());
        let err = ConfigurationError::from(err);
        assert_eq!(err.processor_type, None);
        test_helpers::assert_contains!(err.to_string(), "(11 > 10)");

        cache
            .cache_pipeline(
                "[index/uuid]",
                Arc::new(pipeline_with_processors("index_pipeline", 10)),
            )
            .unwrap();
    }

    #[test]
    fn invalidate_then_get_is_none() {
        let (_, cache) = cache();
        cache
            .cache_pipeline("[index/uuid]", Arc::new(pipeline_with_processors("p", 1)))
            .unwrap();
        cache.invalidate("[index/uuid]");
        assert!(cache.get("[index/uuid]").is_none());
        cache.invalidate("[index/uuid]");
        assert!(cache.is_empty());
    }

    #[test]
    fn bounded_to_max_entries() {
        let (_, cache) = cache();
        for i in 0..=MAX_ENTRIES {
            cache
                .cache_pipeline(&format!("[index-{i}/uuid]"), Arc::new(pipeline_with_processors("p", 1)))
                .unwrap();
        }
        assert_eq!(cache.len(), MAX_ENTRIES);
    }

    #[test]
    fn least_recently_used_is_evicted() {
        let (time_provider, cache) = cache();
        for i in 0..MAX_ENTRIES {
            time_provider.inc(Duration::from_millis(1));
            cache
                .cache_pipeline(&format!("[index-{i}/uuid]"), Arc::new(pipeline_with_processors("p", 1)))
                .unwrap();
        }
        // touch the oldest entry so the second oldest becomes least recently used
        time_provider.inc(Duration::from_millis(1));
        assert!(cache.get("[index-0/uuid]").is_some());

        cache
            .cache_pipeline("[new/uuid]", Arc::new(pipeline_with_processors("p", 1)))
            .unwrap();
        assert_eq!(cache.len(), MAX_ENTRIES);
        assert!(cache.get("[index-0/uuid]").is_some());
        assert!(cache.get("[index-1/uuid]").is_none());
        assert!(cache.get("[new/uuid]").is_some());
    }

    #[test]
    fn expired_entries() {
        let (time_provider, cache) = cache();
        cache
            .cache_pipeline("[old/uuid]", Arc::new(pipeline_with_processors("p", 1)))
            .unwrap();
        time_provider.inc(EXPIRES_IN);
        // exactly at the limit is still served
        assert!(cache.get("[old/uuid]").is_some());
        time_provider.inc(Duration::from_millis(1));
        assert!(cache.get("[old/uuid]").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn eviction_also_drops_expired() {
        let (time_provider, cache) = cache();
        for i in 0..10 {
            cache
                .cache_pipeline(&format!("[stale-{i}/uuid]"), Arc::new(pipeline_with_processors("p", 1)))
                .unwrap();
        }
        time_provider.inc(EXPIRES_IN + Duration::from_secs(1));
        for i in 10..MAX_ENTRIES {
            cache
                .cache_pipeline(&format!("[fresh-{i}/uuid]"), Arc::new(pipeline_with_processors("p", 1)))
                .unwrap();
        }
        assert_eq!(cache.len(), MAX_ENTRIES);

        cache
            .cache_pipeline("[new/uuid]", Arc::new(pipeline_with_processors("p", 1)))
            .unwrap();
        assert_eq!(cache.len(), MAX_ENTRIES - 10 + 1);
    }
}
