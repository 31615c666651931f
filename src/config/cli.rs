//! CLI argument parsing using clap

use crate::config::{cli_convert, toml, BenchConfig};
use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// holebench - write a controlled mix of data blocks and holes into one file
#[derive(Parser, Debug)]
#[command(name = "holebench")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Target file, created or truncated to --size
    #[arg(long)]
    pub filename: Option<PathBuf>,

    /// Logical file size (e.g., 1G, 100M, 4k)
    #[arg(long)]
    pub size: Option<String>,

    /// Fraction of blocks to write: 1 means no holes, 0 means a fully sparse file
    #[arg(long)]
    pub ratio: Option<f64>,

    /// IO backend
    #[arg(long, value_enum)]
    pub backend: Option<Backend>,

    /// Maximum number of outstanding asynchronous requests (io_uring only)
    #[arg(long)]
    pub backlog: Option<usize>,

    /// Use direct IO (O_DIRECT) with aligned buffers (io_uring only)
    #[arg(long)]
    pub direct: bool,

    /// Number of worker threads
    #[arg(long = "num-jobs", alias = "numjobs")]
    pub num_jobs: Option<usize>,

    /// Block size (e.g., 4k, 64k, 1M)
    #[arg(long)]
    pub bs: Option<String>,

    /// Warm-up time excluded from statistics (e.g., 2s, 1m)
    #[arg(long)]
    pub ramp_time: Option<String>,

    /// Stop submitting after this long and drain (0 = run until every block is written)
    #[arg(long)]
    pub run_time: Option<String>,

    /// Seed for choosing which blocks are written
    #[arg(long)]
    pub seed: Option<u64>,

    /// Logical sector size that direct IO must be aligned to
    #[arg(long)]
    pub sector_size: Option<String>,

    /// Failed writes tolerated before the run is aborted
    #[arg(long)]
    pub max_errors: Option<u64>,

    /// What to do with a block whose write failed
    #[arg(long, value_enum)]
    pub on_error: Option<ErrorPolicy>,

    /// Retries per block with --on-error retry
    #[arg(long, default_value = "3")]
    pub max_retries: u32,

    /// Report format
    #[arg(long, value_enum, default_value = "text")]
    pub output: OutputFormat,

    /// TOML configuration file; explicit flags override its values
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Validate and print the configuration without doing any IO
    #[arg(long)]
    pub dry_run: bool,

    /// Verbose logging
    #[arg(long)]
    pub debug: bool,
}

/// IO backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Backend {
    /// Memory-mapped writes
    Mmap,
    /// Asynchronous writes through io_uring
    #[value(name = "io_uring", alias = "io-uring")]
    IoUring,
}

/// Failed write handling
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ErrorPolicy {
    /// Count the failure and move on
    Count,
    /// Resubmit the block up to --max-retries times
    Retry,
}

/// Report format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

impl Cli {
    /// Parse CLI arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Build the run configuration from the flags and the optional TOML file
    ///
    /// Without `--config`, `--filename`, `--size` and `--ratio` are required.
    pub fn build_config(&self) -> Result<BenchConfig> {
        let base = match &self.config {
            Some(path) => toml::parse_toml_file(path)?,
            None => {
                let filename = self
                    .filename
                    .clone()
                    .ok_or_else(|| anyhow::anyhow!("--filename is required"))?;
                let size = self
                    .size
                    .as_deref()
                    .ok_or_else(|| anyhow::anyhow!("--size is required"))?;
                let size = cli_convert::parse_size(size).context("Invalid --size")?;
                let ratio = self
                    .ratio
                    .ok_or_else(|| anyhow::anyhow!("--ratio is required"))?;
                BenchConfig::new(filename, size, ratio)
            }
        };

        toml::merge_cli_with_config(self, base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BackendKind, FailurePolicy};

    #[test]
    fn test_minimal_command_line() {
        let cli = Cli::try_parse_from([
            "holebench",
            "--filename",
            "/tmp/sparse.dat",
            "--size",
            "1m",
            "--ratio",
            "0.5",
        ])
        .unwrap();

        let config = cli.build_config().unwrap();
        assert_eq!(config.filename, PathBuf::from("/tmp/sparse.dat"));
        assert_eq!(config.size, 1024 * 1024);
        assert_eq!(config.ratio, 0.5);
        assert_eq!(config.block_size, 4096);
        assert_eq!(config.backend, BackendKind::IoUring);
        assert_eq!(config.num_jobs, 1);
    }

    #[test]
    fn test_all_flags() {
        let cli = Cli::try_parse_from([
            "holebench",
            "--filename",
            "/tmp/f",
            "--size",
            "64m",
            "--ratio",
            "0.25",
            "--backend",
            "mmap",
            "--num-jobs",
            "4",
            "--bs",
            "64k",
            "--ramp-time",
            "2s",
            "--run-time",
            "1m",
            "--seed",
            "42",
            "--on-error",
            "retry",
            "--max-retries",
            "5",
        ])
        .unwrap();

        let config = cli.build_config().unwrap();
        assert_eq!(config.backend, BackendKind::Mmap);
        assert_eq!(config.num_jobs, 4);
        assert_eq!(config.block_size, 64 * 1024);
        assert_eq!(config.ramp_time, 2);
        assert_eq!(config.run_time, Some(60));
        assert_eq!(config.seed, 42);
        assert_eq!(config.on_error, FailurePolicy::Retry { max_retries: 5 });
    }

    #[test]
    fn test_io_uring_spellings() {
        for spelling in ["io_uring", "io-uring"] {
            let cli = Cli::try_parse_from(["holebench", "--backend", spelling]).unwrap();
            assert_eq!(cli.backend, Some(Backend::IoUring));
        }
    }

    #[test]
    fn test_missing_required_options() {
        let cli = Cli::try_parse_from(["holebench", "--size", "1m", "--ratio", "1"]).unwrap();
        let err = cli.build_config().unwrap_err();
        assert!(err.to_string().contains("--filename"));

        let cli = Cli::try_parse_from(["holebench", "--filename", "/tmp/f", "--size", "1m"]).unwrap();
        assert!(cli.build_config().is_err());
    }
}
