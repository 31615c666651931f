//! Human-readable text output

use super::NO_SAMPLES_NOTE;
use crate::config::BenchConfig;
use crate::util::format::{
    format_bytes, format_duration, format_number, format_rate, format_throughput,
};
use crate::worker::RunReport;
use std::fmt::Write;

const RULE: &str = "═══════════════════════════════════════════════════════════";

/// Print the run summary to stdout
pub fn print_report(report: &RunReport, config: &BenchConfig, allocated_bytes: Option<u64>) {
    print!("{}", render_report(report, config, allocated_bytes));
}

/// Render the run summary
///
/// Shows the workload, what was written, throughput and op rate over the
/// measurement window, latency percentiles, and how much storage the file
/// ended up using.
pub fn render_report(report: &RunReport, config: &BenchConfig, allocated_bytes: Option<u64>) -> String {
    // Writing into a String cannot fail
    let mut out = String::new();
    let metrics = &report.metrics;

    let _ = writeln!(out, "{}", RULE);
    let _ = writeln!(out, "                    TEST RESULTS");
    let _ = writeln!(out, "{}", RULE);
    let _ = writeln!(out);

    let _ = writeln!(out, "Workload:");
    let _ = writeln!(out, "  File:     {}", config.filename.display());
    let _ = writeln!(
        out,
        "  Size:     {} ({} blocks of {})",
        format_bytes(config.size),
        format_number(report.planned_writes + report.planned_skips),
        format_bytes(config.block_size)
    );
    let _ = writeln!(out, "  Ratio:    {:.3}", config.ratio);
    let _ = writeln!(
        out,
        "  Backend:  {}{}",
        config.backend,
        if config.direct { " (direct)" } else { "" }
    );
    let _ = writeln!(out, "  Jobs:     {}", config.num_jobs);
    let _ = writeln!(out);

    let _ = writeln!(out, "Elapsed Time: {:.3}s", report.elapsed.as_secs_f64());
    if report.interrupted {
        let _ = writeln!(out, "  (stopped before the plan was exhausted)");
    }
    let _ = writeln!(out);

    let _ = writeln!(out, "Operations:");
    let _ = writeln!(
        out,
        "  Written:  {} ops ({}) of {} planned ({})",
        format_number(report.completed),
        format_bytes(report.completed_bytes),
        format_number(report.planned_writes),
        format_bytes(report.planned_bytes)
    );
    let _ = writeln!(out, "  Holes:    {} blocks", format_number(report.skipped_blocks));
    if metrics.failed_ops > 0 {
        let _ = writeln!(out, "  Failed:   {}", format_number(metrics.failed_ops));
    }
    if report.retried > 0 {
        let _ = writeln!(out, "  Retried:  {}", format_number(report.retried));
    }
    if metrics.ramp_discarded > 0 {
        let _ = writeln!(
            out,
            "  Ramp:     {} ops excluded ({}s warm-up)",
            format_number(metrics.ramp_discarded),
            config.ramp_time
        );
    }
    let _ = writeln!(out);

    let _ = writeln!(out, "Throughput:");
    if metrics.is_empty() {
        let _ = writeln!(out, "  {}", NO_SAMPLES_NOTE);
    } else {
        let _ = writeln!(
            out,
            "  {} ops measured over {:.3}s",
            format_number(metrics.ops),
            metrics.window.as_secs_f64()
        );
        let _ = writeln!(out, "  Bandwidth: {}", format_throughput(metrics.throughput()));
        let _ = writeln!(out, "  IOPS:      {}", format_rate(metrics.ops_per_sec()));
    }
    let _ = writeln!(out);

    let _ = writeln!(out, "Latency:");
    match &metrics.latency {
        Some(latency) => {
            let _ = writeln!(out, "  Min:    {}", format_duration(latency.min));
            let _ = writeln!(out, "  Mean:   {}", format_duration(latency.mean));
            let _ = writeln!(out, "  Max:    {}", format_duration(latency.max));
            let _ = writeln!(out);
            let _ = writeln!(out, "  Percentiles:");
            let _ = writeln!(out, "    p50.00: {}", format_duration(latency.p50));
            let _ = writeln!(out, "    p99.00: {}", format_duration(latency.p99));
            let _ = writeln!(out, "    p99.90: {}", format_duration(latency.p999));
        }
        None => {
            let _ = writeln!(out, "  No latency data collected");
        }
    }
    let _ = writeln!(out);

    if let Some(allocated) = allocated_bytes {
        let _ = writeln!(out, "Storage:");
        let _ = writeln!(
            out,
            "  Allocated: {} of {} logical ({:.1}%)",
            format_bytes(allocated),
            format_bytes(config.size),
            percent(allocated, config.size)
        );
        let _ = writeln!(out);
    }

    if report.workers.len() > 1 {
        let _ = writeln!(out, "Workers:");
        for (worker, measured) in report.workers.iter().zip(&metrics.worker_ops) {
            let _ = writeln!(
                out,
                "  #{:<3} {} written, {} measured, {} failed",
                worker.id,
                format_number(worker.completed),
                format_number(*measured),
                format_number(worker.failed)
            );
        }
        let _ = writeln!(out);
    }

    if report.peak_in_flight > 0 {
        let _ = writeln!(out, "Peak in flight: {} (backlog {})", report.peak_in_flight, config.backlog);
        let _ = writeln!(out);
    }

    let _ = writeln!(out, "{}", RULE);
    out
}

fn percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 * 100.0 / whole as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::{LatencySummary, MetricsSnapshot};
    use crate::worker::WorkerSummary;
    use std::time::Duration;

    fn report(ops: u64) -> RunReport {
        let latency = (ops > 0).then(|| LatencySummary {
            min: Duration::from_micros(5),
            mean: Duration::from_micros(20),
            p50: Duration::from_micros(18),
            p99: Duration::from_micros(90),
            p999: Duration::from_micros(300),
            max: Duration::from_millis(2),
        });
        RunReport {
            metrics: MetricsSnapshot {
                ops,
                bytes: ops * 4096,
                failed_ops: 0,
                ramp_discarded: 128 - ops,
                window: Duration::from_secs(1),
                latency,
                worker_ops: vec![ops],
            },
            planned_writes: 128,
            planned_bytes: 128 * 4096,
            planned_skips: 128,
            skipped_blocks: 128,
            submitted: 128,
            completed: 128,
            completed_bytes: 128 * 4096,
            retried: 0,
            elapsed: Duration::from_millis(1500),
            interrupted: false,
            peak_in_flight: 0,
            workers: vec![WorkerSummary {
                id: 0,
                blocks: 256,
                skipped: 128,
                submitted: 128,
                completed: 128,
                completed_bytes: 128 * 4096,
                failed: 0,
                retried: 0,
            }],
        }
    }

    #[test]
    fn test_report_contents() {
        let config = BenchConfig::new("/tmp/x.dat", 1024 * 1024, 0.5);
        let text = render_report(&report(128), &config, Some(512 * 1024));

        assert!(text.contains("TEST RESULTS"));
        assert!(text.contains("128 ops (512.00 KiB) of 128 planned"));
        assert!(text.contains("256 blocks of 4.00 KiB"));
        assert!(text.contains("Bandwidth: 512.00 KiB/s"));
        assert!(text.contains("p99.90: 300.00us"));
        assert!(text.contains("Allocated: 512.00 KiB of 1.00 MiB logical (50.0%)"));
        assert!(!text.contains(NO_SAMPLES_NOTE));
    }

    #[test]
    fn test_report_without_samples() {
        let config = BenchConfig::new("/tmp/x.dat", 1024 * 1024, 0.5);
        let text = render_report(&report(0), &config, None);

        assert!(text.contains(NO_SAMPLES_NOTE));
        assert!(text.contains("No latency data collected"));
        assert!(text.contains("128 ops excluded"));
        assert!(!text.contains("Storage:"));
    }
}
