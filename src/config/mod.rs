//! Configuration module
//!
//! Handles CLI argument parsing, TOML configuration files, and validation.
//! Everything funnels into [`BenchConfig`], the strongly-typed description of
//! one benchmark run that the engine consumes.

pub mod cli;
pub mod cli_convert;
pub mod toml;
pub mod validator;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Seed used for the workload plan when none is given
pub const DEFAULT_SEED: u64 = 0xcafe_f00d_d15e_a5e5;

/// Complete benchmark configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchConfig {
    /// Target file, created/truncated to `size`
    pub filename: PathBuf,
    /// Total logical file extent in bytes
    pub size: u64,
    /// Fraction of blocks that receive a write (0.0 - 1.0)
    pub ratio: f64,
    /// IO backend
    #[serde(default)]
    pub backend: BackendKind,
    /// Maximum outstanding asynchronous requests (io_uring only)
    #[serde(default = "default_backlog")]
    pub backlog: usize,
    /// Unbuffered IO with aligned buffers (io_uring only)
    #[serde(default)]
    pub direct: bool,
    /// Number of worker threads
    #[serde(default = "default_num_jobs")]
    pub num_jobs: usize,
    /// Block size in bytes
    #[serde(default = "default_block_size")]
    pub block_size: u64,
    /// Warm-up window excluded from statistics, in seconds
    #[serde(default)]
    pub ramp_time: u64,
    /// Run-duration cap in seconds (None = run until the plan is exhausted)
    #[serde(default)]
    pub run_time: Option<u64>,
    /// Seed for the block selection permutation
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Logical sector size that direct IO offsets and lengths must respect
    #[serde(default = "default_sector_size")]
    pub sector_size: u64,
    /// Failed operations tolerated before the run is aborted
    #[serde(default = "default_max_errors")]
    pub max_errors: u64,
    /// What to do with a block whose write failed
    #[serde(default)]
    pub on_error: FailurePolicy,
}

fn default_backlog() -> usize {
    256
}

fn default_num_jobs() -> usize {
    1
}

fn default_block_size() -> u64 {
    4096
}

fn default_seed() -> u64 {
    DEFAULT_SEED
}

fn default_sector_size() -> u64 {
    512
}

fn default_max_errors() -> u64 {
    16
}

impl BenchConfig {
    /// Create a configuration with defaults for everything but the three
    /// options that have none
    pub fn new(filename: impl Into<PathBuf>, size: u64, ratio: f64) -> Self {
        Self {
            filename: filename.into(),
            size,
            ratio,
            backend: BackendKind::default(),
            backlog: default_backlog(),
            direct: false,
            num_jobs: default_num_jobs(),
            block_size: default_block_size(),
            ramp_time: 0,
            run_time: None,
            seed: default_seed(),
            sector_size: default_sector_size(),
            max_errors: default_max_errors(),
            on_error: FailurePolicy::default(),
        }
    }

    /// Number of blocks covering `[0, size)`
    pub fn block_count(&self) -> u64 {
        if self.block_size == 0 {
            return 0;
        }
        self.size.div_ceil(self.block_size)
    }

    pub fn ramp_duration(&self) -> Duration {
        Duration::from_secs(self.ramp_time)
    }

    /// Run-duration cap; a cap of zero seconds means "no cap"
    pub fn run_duration(&self) -> Option<Duration> {
        self.run_time
            .filter(|&secs| secs > 0)
            .map(Duration::from_secs)
    }
}

/// IO backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Map the file and copy blocks into the mapping
    Mmap,
    /// Asynchronous writes through a shared io_uring submission queue
    #[default]
    IoUring,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Mmap => write!(f, "mmap"),
            BackendKind::IoUring => write!(f, "io_uring"),
        }
    }
}

/// Policy for writes that complete with an error status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Count the failure and move on; the block stays a hole
    #[default]
    Count,
    /// Resubmit the block up to `max_retries` times before counting it
    Retry { max_retries: u32 },
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailurePolicy::Count => write!(f, "count"),
            FailurePolicy::Retry { max_retries } => write!(f, "retry (max {})", max_retries),
        }
    }
}
