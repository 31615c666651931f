//! Write backend abstraction
//!
//! A backend owns the open target file and turns [`WriteRequest`]s into
//! [`Completion`]s. holebench ships two of them:
//!
//! - **mmap**: maps the whole file once and copies each payload into the
//!   mapping. Every submission completes before `submit` returns.
//! - **io_uring**: queues writes on one shared submission/completion ring.
//!   At most `backlog` requests are outstanding at any instant; a submission
//!   past that limit fails with [`BenchError::Capacity`] and the caller has to
//!   reap completions first.
//!
//! # Lifecycle
//!
//! 1. [`open`] creates the target file and the backend-specific state on the
//!    main thread, before any worker exists
//! 2. Workers share the backend by reference and call [`Backend::submit`] and
//!    [`Backend::poll_completions`] concurrently
//! 3. Once every worker has joined, the scheduler's owner calls
//!    [`Backend::close`], which flushes the file and releases everything
//!
//! # Request state
//!
//! Every submission yields a [`Ticket`]. A ticket is either already
//! `Completed` (synchronous backends) or `Submitted`, in which case the
//! matching [`Completion`] is later delivered to the submitting worker by
//! `poll_completions`. Completions are routed by worker index, so one worker
//! never reaps another worker's requests.

pub mod mmap;

#[cfg(feature = "io_uring")]
pub mod io_uring;

use crate::config::{BackendKind, BenchConfig};
use crate::error::BenchError;
use crate::plan::BlockDescriptor;
use crate::stats::Sample;
use crate::util::buffer::Payload;
use crate::Result;
use std::fmt;
use std::io;
use std::time::{Duration, Instant};

/// One planned write, ready for submission
#[derive(Debug, Clone)]
pub struct WriteRequest {
    /// Index of the submitting worker; completions are routed back to it
    pub worker: usize,
    pub block: BlockDescriptor,
    /// Bytes to write, exactly `block.length` long
    pub payload: Payload,
}

/// Outcome of a finished write
#[derive(Debug)]
pub enum CompletionStatus {
    Success { bytes: u32 },
    Failed(io::Error),
}

impl CompletionStatus {
    /// Build a status from a raw syscall-style result (negative errno on failure)
    ///
    /// A non-negative result shorter than `expected` is a short write and
    /// counts as a failure.
    pub fn from_raw(result: i32, expected: u32) -> Self {
        if result < 0 {
            return CompletionStatus::Failed(io::Error::from_raw_os_error(-result));
        }
        let bytes = result as u32;
        if bytes < expected {
            CompletionStatus::Failed(io::Error::new(
                io::ErrorKind::WriteZero,
                format!("short write: {} of {} bytes", bytes, expected),
            ))
        } else {
            CompletionStatus::Success { bytes }
        }
    }
}

/// A request that reached a final state
#[derive(Debug)]
pub struct Completion {
    pub worker: usize,
    pub block: BlockDescriptor,
    pub submitted_at: Instant,
    pub completed_at: Instant,
    pub status: CompletionStatus,
}

impl Completion {
    /// Submit-to-complete latency
    pub fn latency(&self) -> Duration {
        self.completed_at.saturating_duration_since(self.submitted_at)
    }

    pub fn is_success(&self) -> bool {
        matches!(self.status, CompletionStatus::Success { .. })
    }

    /// Statistics sample for a successful write, `None` for a failure
    pub fn sample(&self) -> Option<Sample> {
        match self.status {
            CompletionStatus::Success { bytes } => Some(Sample {
                latency: self.latency(),
                bytes,
                completed_at: self.completed_at,
            }),
            CompletionStatus::Failed(_) => None,
        }
    }

    /// Convert a failed completion into the matching error
    pub fn into_error(self) -> Option<BenchError> {
        match self.status {
            CompletionStatus::Success { .. } => None,
            CompletionStatus::Failed(source) => Some(BenchError::Io {
                offset: self.block.offset,
                source,
            }),
        }
    }
}

/// State of a request right after submission
#[derive(Debug)]
pub enum Ticket {
    /// Queued; the completion arrives through `poll_completions`
    Submitted { id: u64, block: BlockDescriptor },
    /// Finished during `submit`
    Completed(Completion),
}

/// Capability interface shared by all backends
///
/// Implementations are shared between worker threads, so every method takes
/// `&self`. Only `close` consumes the backend.
pub trait Backend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Submit one write
    ///
    /// # Errors
    ///
    /// - `BenchError::Capacity` when `capacity()` requests are already
    ///   outstanding. Nothing was queued; poll and submit again.
    /// - `BenchError::Resource` if the backend can no longer accept work
    fn submit(&self, request: WriteRequest) -> Result<Ticket>;

    /// Reap completions for `worker`
    ///
    /// Blocks for at most `timeout` waiting for the first completion and then
    /// returns everything that is ready. An empty result means nothing
    /// finished in time.
    fn poll_completions(&self, worker: usize, timeout: Duration) -> Result<Vec<Completion>>;

    /// Requests submitted but not yet reaped by the backend
    fn in_flight(&self) -> usize;

    /// Highest `in_flight` value observed since `open`
    fn peak_in_flight(&self) -> usize;

    /// Maximum number of outstanding requests, `None` if unbounded
    fn capacity(&self) -> Option<usize>;

    /// Bytes of storage backing the target file right now
    fn allocated_bytes(&self) -> Result<u64>;

    /// Flush the target and release every backend resource
    fn close(self: Box<Self>) -> Result<()>;
}

impl fmt::Debug for dyn Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Backend")
            .field("kind", &self.kind())
            .field("in_flight", &self.in_flight())
            .field("capacity", &self.capacity())
            .finish()
    }
}

/// Open the backend selected by `config` for `workers` workers
///
/// Creates the target file as a side effect. Call only with a configuration
/// that passed [`crate::config::validator::validate_config`].
pub fn open(config: &BenchConfig, workers: usize) -> Result<Box<dyn Backend>> {
    match config.backend {
        BackendKind::Mmap => {
            let backend = mmap::MmapBackend::open(&config.filename, config.size, config.direct)?;
            Ok(Box::new(backend))
        }
        #[cfg(feature = "io_uring")]
        BackendKind::IoUring => {
            let backend = io_uring::IoUringBackend::open(
                &config.filename,
                config.size,
                config.block_size,
                config.direct,
                config.backlog,
                workers,
            )?;
            Ok(Box::new(backend))
        }
        #[cfg(not(feature = "io_uring"))]
        BackendKind::IoUring => {
            let _ = workers;
            Err(BenchError::config(
                "io_uring backend not compiled in (enable the `io_uring` feature)",
            ))
        }
    }
}
