//! Building blocks for the command line and environment configuration of the ingest service.

pub mod ingest;
pub mod pool;
