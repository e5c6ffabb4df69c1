//! Config for the worker pools bulk requests are executed on.

use std::{
    io,
    num::NonZeroUsize,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

/// Name of the pool that runs client bulks.
pub const WRITE_POOL: &str = "write";

/// Name of the pool that runs bulks issued by the node itself.
pub const SYSTEM_WRITE_POOL: &str = "system_write";

/// CLI config for the worker pools.
#[derive(Debug, Clone, Copy, clap::Parser)]
pub struct WorkerPoolsConfig {
    /// Number of threads of the `write` worker pool.
    ///
    /// Defaults to the number of logical cores on the system.
    #[clap(long = "num-write-threads", env = "INGEST_NUM_WRITE_THREADS", action)]
    pub num_write_threads: Option<NonZeroUsize>,

    /// Number of threads of the `system_write` worker pool.
    ///
    /// Defaults to a quarter of the logical cores on the system.
    #[clap(
        long = "num-system-write-threads",
        env = "INGEST_NUM_SYSTEM_WRITE_THREADS",
        action
    )]
    pub num_system_write_threads: Option<NonZeroUsize>,
}

impl WorkerPoolsConfig {
    /// Name and thread count of every pool.
    pub fn pools(&self) -> io::Result<[(&'static str, NonZeroUsize); 2]> {
        let cores = std::thread::available_parallelism()?;
        let quarter = NonZeroUsize::new(cores.get().div_ceil(4)).unwrap_or(NonZeroUsize::MIN);
        Ok([
            (WRITE_POOL, self.num_write_threads.unwrap_or(cores)),
            (
                SYSTEM_WRITE_POOL,
                self.num_system_write_threads.unwrap_or(quarter),
            ),
        ])
    }
}

/// Runtime builder for the pool `name`, with its worker threads named `ingest-{name}-{n}`.
pub fn runtime_builder(name: &'static str, num_threads: NonZeroUsize) -> tokio::runtime::Builder {
    let thread_counter = Arc::new(AtomicUsize::new(1));
    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder
        .enable_all()
        .worker_threads(num_threads.get())
        .thread_name_fn(move || {
            format!(
                "ingest-{name}-{}",
                thread_counter.fetch_add(1, Ordering::SeqCst)
            )
        });
    builder
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::ffi::OsString;

    fn parse(args: &[&str]) -> WorkerPoolsConfig {
        WorkerPoolsConfig::parse_from(
            std::iter::once(OsString::from("ingest")).chain(args.iter().map(OsString::from)),
        )
    }

    #[test]
    fn default_thread_counts() {
        let cores = std::thread::available_parallelism().unwrap().get();
        let [(write, write_threads), (system, system_threads)] = parse(&[]).pools().unwrap();

        assert_eq!(write, "write");
        assert_eq!(write_threads.get(), cores);
        assert_eq!(system, "system_write");
        assert_eq!(system_threads.get(), cores.div_ceil(4));
    }

    #[test]
    fn thread_count_overrides() {
        let config = parse(&[
            "--num-write-threads",
            "3",
            "--num-system-write-threads",
            "2",
        ]);
        let counts: Vec<_> = config
            .pools()
            .unwrap()
            .iter()
            .map(|(_, threads)| threads.get())
            .collect();
        assert_eq!(counts, vec![3, 2]);
    }

    #[test]
    fn zero_threads_rejected() {
        let result = WorkerPoolsConfig::try_parse_from(["ingest", "--num-write-threads", "0"]);
        assert!(result.is_err());
    }

    #[test]
    fn worker_threads_are_named_after_their_pool() {
        let runtime = runtime_builder(WRITE_POOL, NonZeroUsize::new(2).unwrap())
            .build()
            .unwrap();
        let name = runtime
            .block_on(async {
                tokio::spawn(async { std::thread::current().name().map(String::from) }).await
            })
            .unwrap()
            .unwrap();
        assert!(name.starts_with("ingest-write-"), "{name}");
        assert_eq!(runtime.metrics().num_workers(), 2);
    }
}
