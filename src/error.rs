//! Error taxonomy
//!
//! Every fatal condition the engine can hit maps onto one [`BenchError`]
//! variant. Configuration and resource errors are raised before workers start
//! (or while the backend is being opened on the main thread). Capacity errors
//! never leave a worker's submit/poll loop, and individual IO failures travel
//! as completion statuses into the statistics rather than as errors.

use std::io;
use thiserror::Error;

/// Errors produced by the benchmark engine
#[derive(Debug, Error)]
pub enum BenchError {
    /// Invalid option or option combination, detected before any IO
    #[error("configuration error: {0}")]
    Config(String),

    /// The target file or a backend resource could not be set up
    #[error("resource error: {what}: {source}")]
    Resource {
        what: String,
        #[source]
        source: io::Error,
    },

    /// The backend already holds `limit` unacknowledged requests
    ///
    /// This is a backpressure signal: the caller must reap completions
    /// before submitting again.
    #[error("backend saturated: {limit} requests already in flight")]
    Capacity { limit: usize },

    /// A single operation finished with an error status
    #[error("write at offset {offset} failed: {source}")]
    Io {
        offset: u64,
        #[source]
        source: io::Error,
    },

    /// More operations failed than the configured tolerance allows
    #[error("aborting: {failed} operations failed (tolerance {limit})")]
    TooManyErrors { failed: u64, limit: u64 },
}

impl BenchError {
    /// Shorthand for a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        BenchError::Config(msg.into())
    }

    /// Wrap an OS error with a description of the resource involved
    pub fn resource(what: impl Into<String>, source: io::Error) -> Self {
        BenchError::Resource {
            what: what.into(),
            source,
        }
    }

    /// Wrap the current `errno` as a resource error
    pub fn last_os_error(what: impl Into<String>) -> Self {
        Self::resource(what, io::Error::last_os_error())
    }

    /// True for the backpressure signal that callers are expected to absorb
    pub fn is_capacity(&self) -> bool {
        matches!(self, BenchError::Capacity { .. })
    }
}
