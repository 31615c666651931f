//! Configuration validation
//!
//! All checks here run before the target file is touched, so an invalid
//! combination never results in IO.

use super::{BackendKind, BenchConfig};
use crate::error::BenchError;
use crate::Result;
use tracing::warn;

/// Validate complete configuration
pub fn validate_config(config: &BenchConfig) -> Result<()> {
    validate_geometry(config)?;
    validate_ratio(config.ratio)?;
    validate_concurrency(config)?;
    validate_backend(config)?;
    Ok(())
}

/// File size and block size
fn validate_geometry(config: &BenchConfig) -> Result<()> {
    if config.filename.as_os_str().is_empty() {
        return Err(BenchError::config("filename must not be empty"));
    }

    if config.size == 0 {
        return Err(BenchError::config("size must be at least 1 byte"));
    }

    if config.block_size == 0 {
        return Err(BenchError::config("bs must be at least 1 byte"));
    }

    if config.block_size > u32::MAX as u64 {
        return Err(BenchError::config(format!(
            "bs {} exceeds the maximum of {} bytes",
            config.block_size,
            u32::MAX
        )));
    }

    if config.size > i64::MAX as u64 {
        return Err(BenchError::config(format!(
            "size {} exceeds the maximum file size of {} bytes",
            config.size,
            i64::MAX
        )));
    }

    if config.block_size > config.size {
        warn!(
            bs = config.block_size,
            size = config.size,
            "block size is larger than the file, the plan has a single truncated block"
        );
    }

    Ok(())
}

/// Ratio must be a real number in [0, 1]
pub fn validate_ratio(ratio: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&ratio) {
        // NaN fails the range check as well
        return Err(BenchError::config(format!(
            "ratio must be within [0, 1], got {}",
            ratio
        )));
    }
    Ok(())
}

fn validate_concurrency(config: &BenchConfig) -> Result<()> {
    if config.num_jobs == 0 {
        return Err(BenchError::config("num-jobs must be at least 1"));
    }

    let cpus = num_cpus::get();
    if config.num_jobs > cpus {
        warn!(
            num_jobs = config.num_jobs,
            cpus, "more workers than CPUs, workers will contend for cores"
        );
    }

    let blocks = config.block_count();
    if config.num_jobs as u64 > blocks {
        warn!(
            num_jobs = config.num_jobs,
            blocks, "more workers than blocks, some workers will have nothing to do"
        );
    }

    Ok(())
}

/// Backend-specific option combinations
fn validate_backend(config: &BenchConfig) -> Result<()> {
    match config.backend {
        BackendKind::Mmap => {
            if config.direct {
                return Err(BenchError::config(
                    "direct IO is not available with the mmap backend (mapped writes go through the page cache)",
                ));
            }
            if config.size > usize::MAX as u64 {
                return Err(BenchError::config(format!(
                    "size {} cannot be mapped into the address space",
                    config.size
                )));
            }
        }
        BackendKind::IoUring => {
            if config.backlog == 0 {
                return Err(BenchError::config("backlog must be at least 1 for io_uring"));
            }
            if config.backlog > u32::MAX as usize {
                return Err(BenchError::config(format!(
                    "backlog {} is too large for an io_uring queue",
                    config.backlog
                )));
            }
            if config.direct {
                validate_direct_alignment(config)?;
            }
        }
    }

    Ok(())
}

/// Direct IO needs every offset and length to be a sector multiple
///
/// Checked against the configured `sector_size` here. The io_uring backend
/// checks again at open against the size the device actually reports.
fn validate_direct_alignment(config: &BenchConfig) -> Result<()> {
    let sector = config.sector_size;
    if sector == 0 || !sector.is_power_of_two() {
        return Err(BenchError::config(format!(
            "sector size must be a power of two, got {}",
            sector
        )));
    }

    if config.block_size % sector != 0 {
        return Err(BenchError::config(format!(
            "bs {} is not a multiple of the {}-byte logical sector size required by direct IO",
            config.block_size, sector
        )));
    }

    // The final block is truncated to `size % bs`; it must stay aligned too
    if config.size % sector != 0 {
        return Err(BenchError::config(format!(
            "size {} is not a multiple of the {}-byte logical sector size required by direct IO",
            config.size, sector
        )));
    }

    Ok(())
}
