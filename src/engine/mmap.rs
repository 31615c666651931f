//! Memory-mapped write backend
//!
//! The target file is mapped once, read-write and `MAP_SHARED`, over its full
//! logical extent. A write is a `memcpy` into the mapping, so its latency is
//! the copy plus whatever page faults the first touch of each page costs
//! (that is where block allocation for a hole happens).
//!
//! Writes land in the page cache only. The mapping is flushed with
//! `msync(MS_SYNC)` once, at close, outside of any measured operation.
//!
//! Direct IO is meaningless here and is refused at open.

use super::{Backend, Completion, CompletionStatus, Ticket, WriteRequest};
use crate::config::BackendKind;
use crate::error::BenchError;
use crate::target::TargetFile;
use crate::Result;
use std::io;
use std::path::Path;
use std::ptr::{self, NonNull};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// A live `mmap` of the whole target
struct Mapping {
    addr: NonNull<u8>,
    len: usize,
}

impl Mapping {
    fn new(target: &TargetFile) -> Result<Self> {
        let len = usize::try_from(target.size()).map_err(|_| {
            BenchError::config(format!("size {} cannot be mapped", target.size()))
        })?;
        if len == 0 {
            return Err(BenchError::config("cannot map an empty file"));
        }

        // SAFETY: fd is open read-write for the lifetime of the call and len is
        // non-zero. The result is checked against MAP_FAILED.
        let addr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                target.fd(),
                0,
            )
        };
        if addr == libc::MAP_FAILED {
            return Err(BenchError::last_os_error(format!(
                "mmap {} ({} bytes)",
                target.path().display(),
                len
            )));
        }

        let addr = NonNull::new(addr as *mut u8)
            .ok_or_else(|| BenchError::resource("mmap returned null", io::Error::from(io::ErrorKind::Other)))?;
        Ok(Self { addr, len })
    }

    fn sync(&self) -> io::Result<()> {
        // SAFETY: addr/len describe a mapping owned by self.
        let rc = unsafe { libc::msync(self.addr.as_ptr() as *mut libc::c_void, self.len, libc::MS_SYNC) };
        if rc < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }
}

impl Drop for Mapping {
    fn drop(&mut self) {
        // SAFETY: the mapping was created in `new` with exactly this range and
        // is unmapped only here.
        let rc = unsafe { libc::munmap(self.addr.as_ptr() as *mut libc::c_void, self.len) };
        if rc < 0 {
            warn!(error = %io::Error::last_os_error(), "munmap failed");
        }
    }
}

/// Synchronous backend writing through a shared file mapping
pub struct MmapBackend {
    // Declared before `target` so the mapping goes away before the descriptor
    mapping: Mapping,
    target: TargetFile,
}

// SAFETY: the mapping is plain shared memory. Workers only write to the
// disjoint block ranges of their own plan slices, and `submit` bounds-checks
// every copy against the mapping length.
unsafe impl Send for MmapBackend {}
unsafe impl Sync for MmapBackend {}

impl MmapBackend {
    /// Create the target at `path` with `size` bytes and map it
    pub fn open(path: &Path, size: u64, direct: bool) -> Result<Self> {
        if direct {
            return Err(BenchError::config(
                "direct IO is not available with the mmap backend",
            ));
        }

        let target = TargetFile::create(path, size, false)?;
        let mapping = Mapping::new(&target)?;
        debug!(path = %path.display(), size, "mmap backend ready");

        Ok(Self { mapping, target })
    }

    fn copy(&self, request: &WriteRequest) -> CompletionStatus {
        let block = request.block;
        let len = request.payload.len();
        let fits = usize::try_from(block.offset)
            .ok()
            .and_then(|offset| offset.checked_add(len).map(|end| (offset, end)))
            .filter(|&(_, end)| end <= self.mapping.len && len == block.length as usize);

        match fits {
            Some((offset, _)) => {
                // SAFETY: [offset, offset + len) lies inside the mapping, the
                // payload is a distinct heap allocation, and no other worker
                // writes this block.
                unsafe {
                    ptr::copy_nonoverlapping(
                        request.payload.as_ptr(),
                        self.mapping.addr.as_ptr().add(offset),
                        len,
                    );
                }
                CompletionStatus::Success { bytes: block.length }
            }
            None => CompletionStatus::Failed(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "write of {} bytes at offset {} does not fit the {}-byte mapping",
                    len, block.offset, self.mapping.len
                ),
            )),
        }
    }
}

impl Backend for MmapBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Mmap
    }

    fn submit(&self, request: WriteRequest) -> Result<Ticket> {
        let submitted_at = Instant::now();
        let status = self.copy(&request);
        let completed_at = Instant::now();

        Ok(Ticket::Completed(Completion {
            worker: request.worker,
            block: request.block,
            submitted_at,
            completed_at,
            status,
        }))
    }

    fn poll_completions(&self, _worker: usize, _timeout: Duration) -> Result<Vec<Completion>> {
        // Every submission has already completed
        Ok(Vec::new())
    }

    fn in_flight(&self) -> usize {
        0
    }

    fn peak_in_flight(&self) -> usize {
        0
    }

    fn capacity(&self) -> Option<usize> {
        None
    }

    fn allocated_bytes(&self) -> Result<u64> {
        self.target.allocated_bytes()
    }

    fn close(self: Box<Self>) -> Result<()> {
        let started = Instant::now();
        self.mapping.sync().map_err(|e| {
            BenchError::resource(format!("msync {}", self.target.path().display()), e)
        })?;
        debug!(elapsed = ?started.elapsed(), "mapping flushed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{BlockDescriptor, BlockKind};
    use crate::util::buffer::PayloadPool;
    use tempfile::TempDir;

    fn request(pool: &std::sync::Arc<PayloadPool>, offset: u64, length: u32) -> WriteRequest {
        WriteRequest {
            worker: 0,
            block: BlockDescriptor {
                offset,
                length,
                kind: BlockKind::Write,
            },
            payload: pool.payload(offset as usize / 4096, length as usize),
        }
    }

    #[test]
    fn test_mmap_rejects_direct() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("direct.dat");
        assert!(matches!(
            MmapBackend::open(&path, 65536, true),
            Err(BenchError::Config(_))
        ));
        assert!(!path.exists());
    }

    #[test]
    fn test_mmap_write_completes_immediately() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mmap.dat");
        let backend = Box::new(MmapBackend::open(&path, 65536, false).unwrap());
        let pool = PayloadPool::new(4096, 4, 512, 3).unwrap();

        let req = request(&pool, 8192, 4096);
        let expected = req.payload.as_slice().to_vec();
        match backend.submit(req).unwrap() {
            Ticket::Completed(c) => {
                assert!(c.is_success());
                assert_eq!(c.block.offset, 8192);
                assert!(c.completed_at >= c.submitted_at);
            }
            other => panic!("expected completed ticket, got {:?}", other),
        }
        assert_eq!(backend.in_flight(), 0);
        assert!(backend.poll_completions(0, Duration::ZERO).unwrap().is_empty());
        backend.close().unwrap();

        let data = std::fs::read(&path).unwrap();
        assert_eq!(data.len(), 65536);
        assert_eq!(&data[8192..12288], &expected[..]);
        assert!(data[..8192].iter().all(|&b| b == 0));
        assert!(data[12288..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_mmap_truncated_final_block() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tail.dat");
        let backend = Box::new(MmapBackend::open(&path, 4096 + 100, false).unwrap());
        let pool = PayloadPool::new(4096, 2, 512, 3).unwrap();

        match backend.submit(request(&pool, 4096, 100)).unwrap() {
            Ticket::Completed(c) => assert!(matches!(c.status, CompletionStatus::Success { bytes: 100 })),
            other => panic!("expected completed ticket, got {:?}", other),
        }
        backend.close().unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 4196);
    }

    #[test]
    fn test_mmap_out_of_range_write_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("small.dat");
        let backend = Box::new(MmapBackend::open(&path, 4096, false).unwrap());
        let pool = PayloadPool::new(4096, 2, 512, 3).unwrap();

        match backend.submit(request(&pool, 4096, 4096)).unwrap() {
            Ticket::Completed(c) => assert!(!c.is_success()),
            other => panic!("expected completed ticket, got {:?}", other),
        }
        backend.close().unwrap();
    }
}
