//! holebench - sparse-file write benchmark
//!
//! holebench measures how kernel IO paths behave when a file is filled with a
//! controlled mixture of written ("data") blocks and untouched ("hole") blocks,
//! the access pattern that matters for sparse files and thin-provisioned storage.
//!
//! # Architecture
//!
//! - **Workload planning**: a seeded permutation decides which blocks are written
//! - **Pluggable backends**: mmap copies and io_uring asynchronous writes behind one trait
//! - **Job scheduler**: worker threads over disjoint slices of the plan, bounded in-flight depth
//! - **Statistics**: ramp-up filtering and HdrHistogram latency percentiles

pub mod config;
pub mod engine;
pub mod error;
pub mod output;
pub mod plan;
pub mod stats;
pub mod target;
pub mod util;
pub mod worker;

// Re-export commonly used types
pub use config::BenchConfig;
pub use engine::Backend;
pub use error::BenchError;
pub use plan::WorkloadPlan;

/// Result type used throughout holebench
pub type Result<T> = std::result::Result<T, BenchError>;
