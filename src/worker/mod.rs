//! Job scheduling
//!
//! The [`Scheduler`] splits the block indices of a [`WorkloadPlan`] into
//! `num_jobs` contiguous, disjoint slices and runs one [`Worker`] thread per
//! slice. All workers share one backend and one [`MetricsAggregator`].
//!
//! # Worker loop
//!
//! 1. Stop if the shared stop flag is set or the run deadline passed
//! 2. Submit write blocks (retries first) until the worker's fair share of
//!    the backlog is in flight or the backend reports it is saturated
//! 3. Reap completions with a bounded timeout and hand them to the metrics
//! 4. Repeat until the slice is exhausted and nothing is in flight
//!
//! On exit a worker always drains its own in-flight requests, so by the time
//! the scheduler returns the backend is idle and can be closed. Failed blocks
//! still waiting for a retry at that point are counted as failed.
//!
//! Every [`PROGRESS_INTERVAL`] finished blocks, across all workers, one line
//! with the remaining share of the plan is logged.
//!
//! Skip blocks are never submitted; they only advance the cursor.

use crate::config::{BenchConfig, FailurePolicy};
use crate::engine::{Backend, Completion, Ticket, WriteRequest};
use crate::error::BenchError;
use crate::plan::{BlockDescriptor, WorkloadPlan};
use crate::stats::progress::{Progress, PROGRESS_INTERVAL};
use crate::stats::{MetricsAggregator, MetricsSnapshot};
use crate::util::buffer::{PayloadPool, DEFAULT_PAYLOAD_SLOTS, DIRECT_IO_ALIGNMENT};
use crate::Result;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Upper bound for a single wait on completions
const POLL_TIMEOUT: Duration = Duration::from_millis(10);

/// Give up draining after this long without progress
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Per-worker counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerSummary {
    pub id: usize,
    /// Blocks in this worker's slice, writes and skips
    pub blocks: u64,
    pub skipped: u64,
    pub submitted: u64,
    /// Successful writes, including those inside the ramp window
    pub completed: u64,
    pub completed_bytes: u64,
    pub failed: u64,
    pub retried: u64,
}

/// Everything known about a finished run
#[derive(Debug, Clone)]
pub struct RunReport {
    pub metrics: MetricsSnapshot,
    pub planned_writes: u64,
    pub planned_bytes: u64,
    pub planned_skips: u64,
    /// Skip blocks the workers actually passed over
    pub skipped_blocks: u64,
    pub submitted: u64,
    pub completed: u64,
    pub completed_bytes: u64,
    pub retried: u64,
    pub elapsed: Duration,
    /// The stop flag ended the run before the plan was exhausted
    pub interrupted: bool,
    pub peak_in_flight: usize,
    pub workers: Vec<WorkerSummary>,
}

/// Fans a plan out to worker threads
pub struct Scheduler<'a> {
    config: &'a BenchConfig,
    plan: &'a WorkloadPlan,
    stop: Arc<AtomicBool>,
}

impl<'a> Scheduler<'a> {
    pub fn new(config: &'a BenchConfig, plan: &'a WorkloadPlan) -> Self {
        Self {
            config,
            plan,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Share an externally owned stop flag, e.g. one set by a signal handler
    pub fn with_stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = stop;
        self
    }

    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Run the plan to completion (or until stopped) on `backend`
    ///
    /// # Errors
    ///
    /// - `BenchError::TooManyErrors` once more than `max_errors` writes failed
    /// - any error a worker could not absorb, after all workers have drained
    pub fn run(&self, backend: &dyn Backend) -> Result<RunReport> {
        let workers = self.config.num_jobs.max(1);
        let metrics = MetricsAggregator::new(workers, self.config.ramp_duration())?;
        let block_size = usize::try_from(self.plan.block_size())
            .map_err(|_| BenchError::config("block size does not fit into memory"))?;
        let pool = PayloadPool::new(
            block_size,
            DEFAULT_PAYLOAD_SLOTS,
            DIRECT_IO_ALIGNMENT,
            self.plan.seed(),
        )?;

        let share = match backend.capacity() {
            Some(capacity) => (capacity / workers).max(1),
            None => 1,
        };
        let progress = Progress::new(self.plan.write_count(), PROGRESS_INTERVAL);
        let started = Instant::now();
        let deadline = self.config.run_duration().map(|limit| started + limit);

        info!(
            backend = %backend.kind(),
            workers,
            share,
            writes = self.plan.write_count(),
            skips = self.plan.skip_count(),
            "starting run"
        );

        let outcomes: Vec<Result<WorkerSummary>> = thread::scope(|s| {
            let handles: Vec<_> = self
                .plan
                .partition(workers)
                .into_iter()
                .enumerate()
                .map(|(id, blocks)| {
                    let worker = Worker {
                        id,
                        blocks,
                        plan: self.plan,
                        backend,
                        metrics: &metrics,
                        progress: &progress,
                        pool: &pool,
                        stop: &self.stop,
                        deadline,
                        share,
                        policy: self.config.on_error,
                        max_errors: self.config.max_errors,
                        in_flight: 0,
                        retry_queue: VecDeque::new(),
                        attempts: HashMap::new(),
                        summary: WorkerSummary {
                            id,
                            ..WorkerSummary::default()
                        },
                    };
                    thread::Builder::new()
                        .name(format!("holebench-worker-{}", id))
                        .spawn_scoped(s, move || worker.run())
                })
                .collect();

            handles
                .into_iter()
                .enumerate()
                .map(|(id, handle)| {
                    let handle = handle
                        .map_err(|e| BenchError::resource(format!("spawn worker {}", id), e))?;
                    handle.join().map_err(|_| {
                        BenchError::resource(
                            format!("join worker {}", id),
                            io::Error::new(io::ErrorKind::Other, "worker thread panicked"),
                        )
                    })?
                })
                .collect()
        });

        let elapsed = started.elapsed();
        let mut summaries = Vec::with_capacity(outcomes.len());
        for outcome in outcomes {
            summaries.push(outcome?);
        }

        let failed = metrics.failed_ops();
        if failed > self.config.max_errors {
            return Err(BenchError::TooManyErrors {
                failed,
                limit: self.config.max_errors,
            });
        }

        let submitted: u64 = summaries.iter().map(|w| w.submitted).sum();
        let retried: u64 = summaries.iter().map(|w| w.retried).sum();
        let report = RunReport {
            metrics: metrics.finalize()?,
            planned_writes: self.plan.write_count(),
            planned_bytes: self.plan.write_bytes(),
            planned_skips: self.plan.skip_count(),
            skipped_blocks: summaries.iter().map(|w| w.skipped).sum(),
            submitted,
            completed: summaries.iter().map(|w| w.completed).sum(),
            completed_bytes: summaries.iter().map(|w| w.completed_bytes).sum(),
            retried,
            elapsed,
            interrupted: self.stop.load(Ordering::Relaxed)
                && submitted.saturating_sub(retried) < self.plan.write_count(),
            peak_in_flight: backend.peak_in_flight(),
            workers: summaries,
        };

        info!(
            completed = report.completed,
            failed,
            elapsed = ?report.elapsed,
            interrupted = report.interrupted,
            "run finished"
        );
        Ok(report)
    }
}

/// One worker thread's state
pub struct Worker<'a> {
    id: usize,
    blocks: Range<u64>,
    plan: &'a WorkloadPlan,
    backend: &'a dyn Backend,
    metrics: &'a MetricsAggregator,
    progress: &'a Progress,
    pool: &'a Arc<PayloadPool>,
    stop: &'a AtomicBool,
    deadline: Option<Instant>,
    /// Requests this worker keeps in flight before it polls
    share: usize,
    policy: FailurePolicy,
    max_errors: u64,
    in_flight: usize,
    retry_queue: VecDeque<BlockDescriptor>,
    /// Retries used per block offset
    attempts: HashMap<u64, u32>,
    summary: WorkerSummary,
}

impl<'a> Worker<'a> {
    fn run(mut self) -> Result<WorkerSummary> {
        self.summary.blocks = self.blocks.end - self.blocks.start;
        debug!(worker = self.id, blocks = ?self.blocks, "worker started");

        let outcome = self.submit_all();
        // Drain even after an error so no request outlives the run
        let drained = self.drain();
        self.abandon_retries();
        outcome?;
        drained?;

        debug!(worker = self.id, summary = ?self.summary, "worker finished");
        Ok(self.summary)
    }

    fn submit_all(&mut self) -> Result<()> {
        let mut cursor = self.blocks.start;

        loop {
            if self.should_stop() {
                return Ok(());
            }

            let mut saturated = false;
            while self.in_flight < self.share {
                let block = match self.retry_queue.pop_front() {
                    Some(block) => block,
                    None => match self.next_write(&mut cursor) {
                        Some(block) => block,
                        None => break,
                    },
                };

                match self.submit(block) {
                    Ok(()) => {}
                    Err(e) if e.is_capacity() => {
                        self.retry_queue.push_front(block);
                        saturated = true;
                        break;
                    }
                    Err(e) => return Err(e),
                }

                if self.should_stop() {
                    return Ok(());
                }
            }

            if self.in_flight == 0 {
                if self.retry_queue.is_empty() && cursor >= self.blocks.end {
                    return Ok(());
                }
                if saturated {
                    // Other workers hold every slot; nothing of ours to reap
                    thread::yield_now();
                }
                continue;
            }

            self.reap(POLL_TIMEOUT)?;
        }
    }

    /// Advance `cursor` to the next write block, counting skips on the way
    fn next_write(&mut self, cursor: &mut u64) -> Option<BlockDescriptor> {
        while *cursor < self.blocks.end {
            let block = self.plan.descriptor(*cursor);
            *cursor += 1;
            if block.is_write() {
                return Some(block);
            }
            self.summary.skipped += 1;
        }
        None
    }

    fn submit(&mut self, block: BlockDescriptor) -> Result<()> {
        let slot = (block.offset / self.plan.block_size()) as usize;
        let request = WriteRequest {
            worker: self.id,
            block,
            payload: self.pool.payload(slot, block.length as usize),
        };

        self.metrics.ramp().mark_start();
        match self.backend.submit(request)? {
            Ticket::Completed(completion) => {
                self.summary.submitted += 1;
                self.complete(completion);
            }
            Ticket::Submitted { .. } => {
                self.summary.submitted += 1;
                self.in_flight += 1;
            }
        }
        Ok(())
    }

    fn reap(&mut self, timeout: Duration) -> Result<usize> {
        let completions = self.backend.poll_completions(self.id, timeout)?;
        let reaped = completions.len();
        for completion in completions {
            self.in_flight = self.in_flight.saturating_sub(1);
            self.complete(completion);
        }
        Ok(reaped)
    }

    fn complete(&mut self, completion: Completion) {
        if let Some(sample) = completion.sample() {
            self.summary.completed += 1;
            self.summary.completed_bytes += sample.bytes as u64;
            self.metrics.record(self.id, sample);
            self.report_progress();
            return;
        }

        let block = completion.block;
        let error = completion.into_error();

        if let FailurePolicy::Retry { max_retries } = self.policy {
            let used = self.attempts.entry(block.offset).or_insert(0);
            if *used < max_retries && !self.stop.load(Ordering::Relaxed) {
                *used += 1;
                self.summary.retried += 1;
                debug!(worker = self.id, offset = block.offset, attempt = *used, "retrying failed write");
                self.retry_queue.push_back(block);
                return;
            }
        }

        match error {
            Some(e) => warn!(worker = self.id, error = %e, "write failed"),
            None => warn!(worker = self.id, offset = block.offset, "write failed"),
        }
        self.record_failure();
    }

    /// Count a block that will not be written
    fn record_failure(&mut self) {
        self.summary.failed += 1;
        let failed = self.metrics.record_failure(self.id);
        self.report_progress();

        if failed > self.max_errors && !self.stop.swap(true, Ordering::Relaxed) {
            error!(failed, limit = self.max_errors, "too many failed writes, stopping");
        }
    }

    /// Fail every block whose retry never got submitted
    ///
    /// A block deferred by backpressure before its first attempt is not a
    /// failure; it is simply left unwritten.
    fn abandon_retries(&mut self) {
        while let Some(block) = self.retry_queue.pop_front() {
            if !self.attempts.contains_key(&block.offset) {
                continue;
            }
            warn!(worker = self.id, offset = block.offset, "run stopped before retry, counting write as failed");
            self.record_failure();
        }
    }

    fn report_progress(&self) {
        if let Some(update) = self.progress.advance() {
            info!(
                finished = update.finished,
                planned = update.planned,
                "remaining: {:.0}%",
                update.remaining_percent
            );
        }
    }

    /// Wait for every request this worker still has in flight
    fn drain(&mut self) -> Result<()> {
        let mut last_progress = Instant::now();
        while self.in_flight > 0 {
            if self.reap(POLL_TIMEOUT)? > 0 {
                last_progress = Instant::now();
            } else if last_progress.elapsed() > DRAIN_TIMEOUT {
                return Err(BenchError::resource(
                    format!("drain worker {}", self.id),
                    io::Error::new(
                        io::ErrorKind::TimedOut,
                        format!("{} writes still in flight", self.in_flight),
                    ),
                ));
            }
        }
        Ok(())
    }

    fn should_stop(&self) -> bool {
        if self.stop.load(Ordering::Relaxed) {
            return true;
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => {
                if !self.stop.swap(true, Ordering::Relaxed) {
                    info!(worker = self.id, "run time reached, stopping");
                }
                true
            }
            _ => false,
        }
    }
}
