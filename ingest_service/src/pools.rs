//! Named worker pools that bulk requests are dispatched onto.

use std::io;

use hashbrown::HashMap;
use ingest_clap_blocks::pool::{WorkerPoolsConfig, runtime_builder};
use observability_deps::tracing::info;
use tokio::runtime::{Handle, Runtime};

/// Handles to the worker pools, by name.
#[derive(Debug, Clone, Default)]
pub struct WorkerPools {
    pools: HashMap<String, Handle>,
}

impl WorkerPools {
    pub fn with_pool(mut self, name: impl Into<String>, handle: Handle) -> Self {
        self.pools.insert(name.into(), handle);
        self
    }

    pub fn handle(&self, name: &str) -> Option<&Handle> {
        self.pools.get(name)
    }
}

/// Owns the runtimes of the configured worker pools. Dropping it shuts the pools down.
#[derive(Debug)]
pub struct PoolRuntimes {
    runtimes: Vec<(&'static str, Runtime)>,
}

impl PoolRuntimes {
    pub fn build(config: &WorkerPoolsConfig) -> io::Result<Self> {
        let mut runtimes = vec![];
        for (name, num_threads) in config.pools()? {
            let runtime = runtime_builder(name, num_threads).build()?;
            info!(
                pool = name,
                num_workers = runtime.metrics().num_workers(),
                "started worker pool"
            );
            runtimes.push((name, runtime));
        }
        Ok(Self { runtimes })
    }

    pub fn pools(&self) -> WorkerPools {
        self.runtimes
            .iter()
            .fold(WorkerPools::default(), |pools, (name, runtime)| {
                pools.with_pool(*name, runtime.handle().clone())
            })
    }
}
