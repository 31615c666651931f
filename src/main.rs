//! holebench CLI entry point

use anyhow::{Context, Result};
use holebench::config::cli::{Cli, OutputFormat};
use holebench::config::validator::validate_config;
use holebench::engine;
use holebench::output::{json, text};
use holebench::util::format::format_bytes;
use holebench::worker::{RunReport, Scheduler};
use holebench::{BenchConfig, WorkloadPlan};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let cli = Cli::parse_args();
    init_logging(cli.debug);

    let config = cli.build_config()?;
    validate_config(&config).context("Configuration validation failed")?;

    if cli.output == OutputFormat::Text {
        println!("holebench v{}", env!("CARGO_PKG_VERSION"));
        println!();
        print_configuration(&config);
    }

    if cli.dry_run {
        if cli.output == OutputFormat::Json {
            println!("{}", serde_json::to_string_pretty(&config)?);
        } else {
            println!();
            println!("Dry run mode - configuration validated successfully");
        }
        return Ok(());
    }

    let stop = Arc::new(AtomicBool::new(false));
    ctrlc::set_handler({
        let stop = Arc::clone(&stop);
        move || {
            if stop.fetch_or(true, Ordering::Relaxed) {
                error!("second interrupt, aborting without draining");
                std::process::exit(130);
            }
            warn!("interrupt received, draining outstanding writes");
        }
    })
    .context("Failed to install Ctrl-C handler")?;

    let (report, allocated_bytes) = run(&config, stop)?;

    if report.metrics.is_empty() && report.completed > 0 {
        warn!(
            ramp_discarded = report.metrics.ramp_discarded,
            ramp_time = config.ramp_time,
            "every completion fell inside the ramp window, no statistics were collected"
        );
    }

    match cli.output {
        OutputFormat::Text => {
            println!();
            text::print_report(&report, &config, allocated_bytes);
        }
        OutputFormat::Json => {
            println!("{}", json::render_report(&report, &config, allocated_bytes)?);
        }
    }

    Ok(())
}

/// Plan, open the backend, schedule the workers and close the backend
///
/// The backend is closed on every path once it was opened, so the target
/// file is flushed even when the run itself failed.
fn run(config: &BenchConfig, stop: Arc<AtomicBool>) -> Result<(RunReport, Option<u64>)> {
    let plan = WorkloadPlan::new(config.size, config.block_size, config.ratio, config.seed)
        .context("Failed to build workload plan")?;
    debug!(
        blocks = plan.block_count(),
        writes = plan.write_count(),
        skips = plan.skip_count(),
        seed = plan.seed(),
        "workload planned"
    );

    let backend = engine::open(config, config.num_jobs)
        .with_context(|| format!("Failed to open {} backend", config.backend))?;
    info!(path = %config.filename.display(), backend = %config.backend, "target ready");

    let outcome = Scheduler::new(config, &plan)
        .with_stop_flag(stop)
        .run(backend.as_ref());

    let allocated_bytes = match backend.allocated_bytes() {
        Ok(bytes) => Some(bytes),
        Err(e) => {
            warn!(error = %e, "could not read allocated size of the target");
            None
        }
    };

    let closed = backend.close();
    let report = outcome.context("Benchmark run failed")?;
    closed.context("Failed to close backend")?;

    Ok((report, allocated_bytes))
}

fn init_logging(debug: bool) {
    let default = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}

fn print_configuration(config: &BenchConfig) {
    println!("Configuration:");
    println!("  Target:");
    println!("    Path: {}", config.filename.display());
    println!("    Size: {}", format_bytes(config.size));
    println!("  Workload:");
    println!("    Block size: {}", format_bytes(config.block_size));
    println!("    Blocks: {}", config.block_count());
    println!("    Ratio: {}", config.ratio);
    println!("    Seed: {:#x}", config.seed);
    println!("  Engine:");
    println!("    Backend: {}", config.backend);
    if config.direct {
        println!("    Direct IO: yes (sector {})", config.sector_size);
    }
    println!("    Backlog: {}", config.backlog);
    println!("  Workers:");
    println!("    Jobs: {}", config.num_jobs);
    if config.ramp_time > 0 {
        println!("    Ramp time: {}s", config.ramp_time);
    }
    if let Some(limit) = config.run_duration() {
        println!("    Run time: {}s", limit.as_secs());
    }
    println!("    Errors: {} (max {})", config.on_error, config.max_errors);
}
