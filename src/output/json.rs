//! JSON output formatting
//!
//! Durations carry both a machine value and a human-readable form, the same
//! shape the text report prints.

use super::NO_SAMPLES_NOTE;
use crate::config::BenchConfig;
use crate::error::BenchError;
use crate::stats::LatencySummary;
use crate::util::format::{format_duration, format_throughput};
use crate::worker::RunReport;
use crate::Result;
use serde::Serialize;
use std::time::Duration;

/// Duration with both nanoseconds and human-readable format
#[derive(Debug, Clone, Serialize)]
pub struct JsonDuration {
    pub nanos: u64,
    pub human: String,
}

impl JsonDuration {
    pub fn from_duration(d: Duration) -> Self {
        Self {
            nanos: u64::try_from(d.as_nanos()).unwrap_or(u64::MAX),
            human: format_duration(d),
        }
    }
}

/// Throughput with bytes/sec and human-readable format
#[derive(Debug, Clone, Serialize)]
pub struct JsonThroughput {
    pub bytes_per_sec: f64,
    pub human: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct JsonLatency {
    pub min: JsonDuration,
    pub mean: JsonDuration,
    pub p50: JsonDuration,
    pub p99: JsonDuration,
    pub p99_9: JsonDuration,
    pub max: JsonDuration,
}

impl From<&LatencySummary> for JsonLatency {
    fn from(latency: &LatencySummary) -> Self {
        Self {
            min: JsonDuration::from_duration(latency.min),
            mean: JsonDuration::from_duration(latency.mean),
            p50: JsonDuration::from_duration(latency.p50),
            p99: JsonDuration::from_duration(latency.p99),
            p99_9: JsonDuration::from_duration(latency.p999),
            max: JsonDuration::from_duration(latency.max),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JsonWorker {
    pub id: usize,
    pub blocks: u64,
    pub completed: u64,
    pub measured: u64,
    pub failed: u64,
    pub retried: u64,
}

/// Top-level JSON document
#[derive(Debug, Clone, Serialize)]
pub struct JsonReport {
    pub config: BenchConfig,
    pub elapsed: JsonDuration,
    pub interrupted: bool,
    pub planned_writes: u64,
    pub planned_bytes: u64,
    pub planned_skips: u64,
    pub completed: u64,
    pub completed_bytes: u64,
    pub failed: u64,
    pub retried: u64,
    pub ramp_discarded: u64,
    pub measured_ops: u64,
    pub measured_bytes: u64,
    pub window: JsonDuration,
    pub throughput: JsonThroughput,
    pub ops_per_sec: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency: Option<JsonLatency>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allocated_bytes: Option<u64>,
    pub peak_in_flight: usize,
    pub workers: Vec<JsonWorker>,
}

/// Build the JSON document for a finished run
pub fn build_report(report: &RunReport, config: &BenchConfig, allocated_bytes: Option<u64>) -> JsonReport {
    let metrics = &report.metrics;
    let bytes_per_sec = metrics.throughput();

    JsonReport {
        config: config.clone(),
        elapsed: JsonDuration::from_duration(report.elapsed),
        interrupted: report.interrupted,
        planned_writes: report.planned_writes,
        planned_bytes: report.planned_bytes,
        planned_skips: report.planned_skips,
        completed: report.completed,
        completed_bytes: report.completed_bytes,
        failed: metrics.failed_ops,
        retried: report.retried,
        ramp_discarded: metrics.ramp_discarded,
        measured_ops: metrics.ops,
        measured_bytes: metrics.bytes,
        window: JsonDuration::from_duration(metrics.window),
        throughput: JsonThroughput {
            bytes_per_sec,
            human: format_throughput(bytes_per_sec),
        },
        ops_per_sec: metrics.ops_per_sec(),
        latency: metrics.latency.as_ref().map(JsonLatency::from),
        note: metrics.is_empty().then_some(NO_SAMPLES_NOTE),
        allocated_bytes,
        peak_in_flight: report.peak_in_flight,
        workers: report
            .workers
            .iter()
            .zip(&metrics.worker_ops)
            .map(|(worker, &measured)| JsonWorker {
                id: worker.id,
                blocks: worker.blocks,
                completed: worker.completed,
                measured,
                failed: worker.failed,
                retried: worker.retried,
            })
            .collect(),
    }
}

/// Render the report as pretty-printed JSON
pub fn render_report(report: &RunReport, config: &BenchConfig, allocated_bytes: Option<u64>) -> Result<String> {
    serde_json::to_string_pretty(&build_report(report, config, allocated_bytes))
        .map_err(|e| BenchError::resource("serialize report", e.into()))
}
