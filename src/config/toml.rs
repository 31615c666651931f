//! TOML configuration file parsing

use super::BenchConfig;
use crate::config::cli::Cli;
use crate::config::cli_convert::{convert_backend, convert_failure_policy, parse_duration, parse_size};
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

/// Parse TOML configuration file
pub fn parse_toml_file(path: &Path) -> Result<BenchConfig> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_toml_string(&contents)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Parse TOML configuration from string
pub fn parse_toml_string(contents: &str) -> Result<BenchConfig> {
    let config: BenchConfig = ::toml::from_str(contents)
        .context("Failed to parse TOML configuration")?;

    Ok(config)
}

/// Merge CLI arguments with a base configuration (CLI takes precedence)
pub fn merge_cli_with_config(cli: &Cli, mut config: BenchConfig) -> Result<BenchConfig> {
    if let Some(ref filename) = cli.filename {
        config.filename = filename.clone();
    }
    if let Some(ref size) = cli.size {
        config.size = parse_size(size).context("Invalid --size")?;
    }
    if let Some(ratio) = cli.ratio {
        config.ratio = ratio;
    }
    if let Some(backend) = cli.backend {
        config.backend = convert_backend(backend);
    }
    if let Some(backlog) = cli.backlog {
        config.backlog = backlog;
    }
    if cli.direct {
        config.direct = true;
    }
    if let Some(num_jobs) = cli.num_jobs {
        config.num_jobs = num_jobs;
    }
    if let Some(ref bs) = cli.bs {
        config.block_size = parse_size(bs).context("Invalid --bs")?;
    }
    if let Some(ref ramp) = cli.ramp_time {
        config.ramp_time = parse_duration(ramp).context("Invalid --ramp-time")?;
    }
    if let Some(ref run) = cli.run_time {
        config.run_time = Some(parse_duration(run).context("Invalid --run-time")?);
    }
    if let Some(seed) = cli.seed {
        config.seed = seed;
    }
    if let Some(ref sector) = cli.sector_size {
        config.sector_size = parse_size(sector).context("Invalid --sector-size")?;
    }
    if let Some(max_errors) = cli.max_errors {
        config.max_errors = max_errors;
    }
    if let Some(policy) = cli.on_error {
        config.on_error = convert_failure_policy(policy, cli.max_retries);
    }

    Ok(config)
}
