//! graph-bench library
//!
//! Concurrent load generation and latency measurement against a FalkorDB
//! endpoint: weighted query sampling, templating, paced workers, and a
//! single aggregator feeding live progress and the final report.

pub mod aggregator;
pub mod config;
pub mod distribution;
pub mod engine;
pub mod error;
pub mod executor;
pub mod falkordb;
pub mod limiter;
pub mod record;
pub mod report;
pub mod reporter;
pub mod resp;
pub mod shutdown;
pub mod stats;
pub mod templater;
pub mod worker;
pub mod workload;

// Re-export commonly used types
pub use config::BenchConfig;
pub use engine::{run_benchmark, EngineSettings, RunOutcome};
pub use error::{BenchError, Result};
pub use executor::{QueryExecutor, QueryOutcome};
pub use falkordb::{FalkorExecutor, FalkorSettings};
pub use record::{MutationCounts, ResultRecord};
pub use report::BenchmarkResult;
pub use shutdown::{ShutdownSignal, StopReason};
pub use stats::AggregateStats;
pub use worker::ErrorPolicy;
pub use workload::{TermSelection, TermSource, WorkloadSpec};
