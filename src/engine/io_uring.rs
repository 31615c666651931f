//! io_uring write backend
//!
//! One ring per backend, sized to `backlog` entries, owned by a dedicated
//! reactor thread. Workers never touch the ring:
//!
//! ```text
//!  worker 0 ──┐                         ┌──> completions[0] ──> worker 0
//!  worker 1 ──┼─> submissions ─> reactor ┼──> completions[1] ──> worker 1
//!  worker N ──┘        (ring: SQ / CQ)   └──> completions[N] ──> worker N
//! ```
//!
//! A shared atomic counter enforces the backlog. `submit` reserves a slot
//! with a compare-and-swap before anything is queued and fails with
//! [`BenchError::Capacity`] when all slots are taken; the reactor releases
//! the slot when it reaps the matching CQE. The number of requests between
//! `submit` and reap therefore never exceeds `backlog`, across all workers.
//!
//! Each in-flight request keeps its [`WriteRequest`] (and with it the payload
//! allocation) in the reactor's pending table until the kernel is done with
//! the buffer.
//!
//! # Requirements
//!
//! - Linux 5.1 or later
//! - `io_uring` feature (enabled by default)

use super::{Backend, Completion, CompletionStatus, Ticket, WriteRequest};
use crate::config::BackendKind;
use crate::error::BenchError;
use crate::target::TargetFile;
use crate::util::buffer::DIRECT_IO_ALIGNMENT;
use crate::Result;
use crossbeam::channel::{self, Receiver, Sender, TryRecvError};
use io_uring::{opcode, types, IoUring};
use std::collections::HashMap;
use std::io;
use std::os::unix::io::RawFd;
use std::path::Path;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// Bounded counter of outstanding requests
///
/// Workers acquire on submit and the reactor releases on delivery. The
/// counter never exceeds `limit`, even with every worker racing on it,
/// because a slot is only taken by a successful compare-and-swap.
#[derive(Debug)]
struct InFlight {
    current: AtomicUsize,
    peak: AtomicUsize,
    limit: usize,
}

impl InFlight {
    fn new(limit: usize) -> Self {
        Self {
            current: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            limit,
        }
    }

    /// Reserve one slot
    ///
    /// # Returns
    ///
    /// `true` if a slot was taken, `false` if `limit` are already taken. A
    /// successful reservation also raises the recorded peak.
    fn try_acquire(&self) -> bool {
        let mut current = self.current.load(Ordering::Acquire);
        loop {
            if current >= self.limit {
                return false;
            }
            match self.current.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    self.peak.fetch_max(current + 1, Ordering::Relaxed);
                    return true;
                }
                Err(actual) => current = actual,
            }
        }
    }

    /// Give back a slot taken by `try_acquire`
    fn release(&self) {
        self.current.fetch_sub(1, Ordering::AcqRel);
    }

    fn current(&self) -> usize {
        self.current.load(Ordering::Acquire)
    }

    fn peak(&self) -> usize {
        self.peak.load(Ordering::Relaxed)
    }
}

/// A request on its way from a worker to the reactor
struct Submission {
    /// Ring `user_data`, unique for the life of the backend
    id: u64,
    request: WriteRequest,
    submitted_at: Instant,
}

/// Asynchronous backend on a single shared io_uring
pub struct IoUringBackend {
    target: Arc<TargetFile>,
    backlog: usize,
    submissions: Sender<Submission>,
    completions: Vec<Receiver<Completion>>,
    in_flight: Arc<InFlight>,
    next_id: AtomicU64,
    reactor: JoinHandle<Result<()>>,
}

impl IoUringBackend {
    /// Create the target and a ring with `backlog` entries serving `workers` workers
    ///
    /// # Arguments
    ///
    /// * `path` - Target file, created or truncated to `size`
    /// * `size` - Logical file size in bytes
    /// * `block_size` - Length of every write except possibly the last
    /// * `direct` - Open the target with `O_DIRECT`
    /// * `backlog` - Ring size and limit on outstanding requests
    /// * `workers` - Number of completion queues to route into
    ///
    /// # Errors
    ///
    /// - `BenchError::Config` for a zero backlog or worker count, or, with
    ///   `direct`, a block size or file size that is not a multiple of the
    ///   logical block size of the device holding the file
    /// - `BenchError::Resource` if the file or the ring cannot be created
    pub fn open(
        path: &Path,
        size: u64,
        block_size: u64,
        direct: bool,
        backlog: usize,
        workers: usize,
    ) -> Result<Self> {
        if backlog == 0 {
            return Err(BenchError::config("backlog must be at least 1 for io_uring"));
        }
        if workers == 0 {
            return Err(BenchError::config("io_uring backend needs at least one worker"));
        }
        let entries = u32::try_from(backlog)
            .map_err(|_| BenchError::config(format!("backlog {} is too large", backlog)))?;

        let target = Arc::new(TargetFile::create(path, size, direct)?);
        if direct {
            check_direct_alignment(block_size, size, target.logical_block_size())?;
        }
        let ring = IoUring::new(entries)
            .map_err(|e| BenchError::resource(format!("create io_uring with {} entries", entries), e))?;

        let in_flight = Arc::new(InFlight::new(backlog));
        let (submissions, submission_rx) = channel::bounded(backlog);
        let (senders, completions): (Vec<_>, Vec<_>) =
            (0..workers).map(|_| channel::unbounded()).unzip();

        let reactor = Reactor {
            ring,
            retired: Vec::new(),
            fd: target.fd(),
            _target: Arc::clone(&target),
            submissions: submission_rx,
            completions: senders,
            in_flight: Arc::clone(&in_flight),
            pending: HashMap::with_capacity(backlog),
        };
        let reactor = thread::Builder::new()
            .name("holebench-uring".to_string())
            .spawn(move || reactor.run())
            .map_err(|e| BenchError::resource("spawn io_uring reactor thread", e))?;

        debug!(path = %path.display(), size, direct, backlog, workers, "io_uring backend ready");

        Ok(Self {
            target,
            backlog,
            submissions,
            completions,
            in_flight,
            next_id: AtomicU64::new(0),
            reactor,
        })
    }
}

impl Backend for IoUringBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::IoUring
    }

    /// Reserve a backlog slot and hand the request to the reactor
    ///
    /// Never blocks. The write completes later on the submitting worker's
    /// completion queue.
    ///
    /// # Errors
    ///
    /// - `BenchError::Capacity` when `backlog` requests are outstanding
    /// - `BenchError::Resource` when the reactor thread has stopped
    fn submit(&self, request: WriteRequest) -> Result<Ticket> {
        if !self.in_flight.try_acquire() {
            return Err(BenchError::Capacity { limit: self.backlog });
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let block = request.block;
        let submission = Submission {
            id,
            request,
            submitted_at: Instant::now(),
        };

        if self.submissions.send(submission).is_err() {
            self.in_flight.release();
            return Err(BenchError::resource(
                "submit to io_uring",
                io::Error::new(io::ErrorKind::BrokenPipe, "reactor thread has stopped"),
            ));
        }

        Ok(Ticket::Submitted { id, block })
    }

    /// Collect the completions routed to `worker`
    ///
    /// # Arguments
    ///
    /// * `worker` - Index of the polling worker, as passed in `WriteRequest::worker`
    /// * `timeout` - Longest wait for the first completion; zero never blocks
    ///
    /// # Returns
    ///
    /// Every completion already queued once the first arrives, or an empty
    /// vector if none arrived within `timeout`.
    fn poll_completions(&self, worker: usize, timeout: Duration) -> Result<Vec<Completion>> {
        let rx = self.completions.get(worker).ok_or_else(|| {
            BenchError::config(format!("no completion queue for worker {}", worker))
        })?;

        let first = if timeout.is_zero() {
            rx.try_recv().ok()
        } else {
            rx.recv_timeout(timeout).ok()
        };

        let mut reaped = Vec::new();
        if let Some(completion) = first {
            reaped.push(completion);
            reaped.extend(rx.try_iter());
        }
        Ok(reaped)
    }

    fn in_flight(&self) -> usize {
        self.in_flight.current()
    }

    fn peak_in_flight(&self) -> usize {
        self.in_flight.peak()
    }

    fn capacity(&self) -> Option<usize> {
        Some(self.backlog)
    }

    fn allocated_bytes(&self) -> Result<u64> {
        self.target.allocated_bytes()
    }

    /// Stop the reactor, wait for it to deliver everything pending, then fsync
    fn close(self: Box<Self>) -> Result<()> {
        let IoUringBackend {
            target,
            submissions,
            completions,
            reactor,
            ..
        } = *self;

        // Disconnecting the channel lets the reactor drain and exit
        drop(submissions);
        let outcome = reactor.join().map_err(|_| {
            BenchError::resource(
                "join io_uring reactor",
                io::Error::new(io::ErrorKind::Other, "reactor thread panicked"),
            )
        })?;
        drop(completions);
        outcome?;

        target.sync()
    }
}

/// Reject a direct IO geometry the device would refuse write by write
///
/// Every offset is a multiple of `block_size`, so aligning the block size and
/// the file size (the last, possibly short, block) to the device's logical
/// block size covers every request.
fn check_direct_alignment(block_size: u64, size: u64, logical_block_size: u64) -> Result<()> {
    if logical_block_size > DIRECT_IO_ALIGNMENT as u64 {
        return Err(BenchError::config(format!(
            "device logical block size {} exceeds the {}-byte payload alignment",
            logical_block_size, DIRECT_IO_ALIGNMENT
        )));
    }
    if block_size % logical_block_size != 0 {
        return Err(BenchError::config(format!(
            "bs {} is not a multiple of the device logical block size {} required by direct IO",
            block_size, logical_block_size
        )));
    }
    if size % logical_block_size != 0 {
        return Err(BenchError::config(format!(
            "size {} is not a multiple of the device logical block size {}, direct IO would fail on the final block",
            size, logical_block_size
        )));
    }
    Ok(())
}

struct Pending {
    request: WriteRequest,
    submitted_at: Instant,
}

/// Owner of the ring, runs on its own thread
struct Reactor {
    // Dropped before `retired` so the kernel is done with those buffers first
    ring: IoUring,
    retired: Vec<WriteRequest>,
    fd: RawFd,
    _target: Arc<TargetFile>,
    submissions: Receiver<Submission>,
    completions: Vec<Sender<Completion>>,
    in_flight: Arc<InFlight>,
    pending: HashMap<u64, Pending>,
}

impl Reactor {
    /// Reactor loop
    ///
    /// Blocks on the submission channel while nothing is pending, otherwise
    /// moves every queued submission onto the SQ, enters the kernel waiting
    /// for at least one CQE, and delivers what it reaped. Once the channel
    /// disconnects it keeps reaping until `pending` is empty, so close never
    /// drops a request the kernel still owns.
    ///
    /// # Errors
    ///
    /// A non-transient `io_uring_enter` failure fails every pending request
    /// and ends the loop with `BenchError::Resource`.
    fn run(mut self) -> Result<()> {
        let mut accepting = true;

        loop {
            if self.pending.is_empty() {
                if !accepting {
                    break;
                }
                // Idle: block until work arrives or the backend closes
                match self.submissions.recv() {
                    Ok(submission) => self.queue(submission),
                    Err(_) => {
                        accepting = false;
                        continue;
                    }
                }
            }

            while accepting {
                match self.submissions.try_recv() {
                    Ok(submission) => self.queue(submission),
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => accepting = false,
                }
            }

            if self.pending.is_empty() {
                continue;
            }

            if let Err(e) = self.ring.submit_and_wait(1) {
                let transient = e.kind() == io::ErrorKind::Interrupted
                    || e.raw_os_error() == Some(libc::EBUSY);
                if !transient {
                    error!(error = %e, pending = self.pending.len(), "io_uring_enter failed");
                    self.fail_all(&e);
                    return Err(BenchError::resource("wait for io_uring completions", e));
                }
            }

            self.reap();
        }

        debug!("io_uring reactor stopped");
        Ok(())
    }

    /// Push one write SQE, failing the request with EAGAIN if the SQ stays full
    fn queue(&mut self, submission: Submission) {
        let Submission {
            id,
            request,
            submitted_at,
        } = submission;

        let entry = opcode::Write::new(
            types::Fd(self.fd),
            request.payload.as_ptr(),
            request.block.length,
        )
        .offset(request.block.offset)
        .build()
        .user_data(id);

        // SAFETY: the payload buffer stays alive in `pending` until the CQE
        // for `id` has been reaped.
        let mut pushed = unsafe { self.ring.submission().push(&entry).is_ok() };
        if !pushed {
            // SQ full: hand what is queued to the kernel and try once more
            if let Err(e) = self.ring.submit() {
                warn!(error = %e, "io_uring submit failed while the queue was full");
            }
            // SAFETY: as above.
            pushed = unsafe { self.ring.submission().push(&entry).is_ok() };
        }

        if pushed {
            self.pending.insert(id, Pending { request, submitted_at });
        } else {
            let status = CompletionStatus::Failed(io::Error::from_raw_os_error(libc::EAGAIN));
            self.deliver(request, submitted_at, status);
        }
    }

    fn reap(&mut self) {
        // Copy out first: delivering needs `&self` while the CQ borrows the ring
        let mut finished = Vec::new();
        for cqe in self.ring.completion() {
            finished.push((cqe.user_data(), cqe.result()));
        }

        for (id, result) in finished {
            match self.pending.remove(&id) {
                Some(Pending { request, submitted_at }) => {
                    let status = CompletionStatus::from_raw(result, request.block.length);
                    self.deliver(request, submitted_at, status);
                }
                None => warn!(id, "completion for unknown request"),
            }
        }
    }

    /// Fail every pending request after an unrecoverable ring error
    fn fail_all(&mut self, cause: &io::Error) {
        let pending: Vec<Pending> = self.pending.drain().map(|(_, p)| p).collect();
        for Pending { request, submitted_at } in pending {
            let status = CompletionStatus::Failed(io::Error::new(cause.kind(), cause.to_string()));
            self.retired.push(request.clone());
            self.deliver(request, submitted_at, status);
        }
    }

    /// Release the backlog slot and route the completion to its worker
    fn deliver(&self, request: WriteRequest, submitted_at: Instant, status: CompletionStatus) {
        let completion = Completion {
            worker: request.worker,
            block: request.block,
            submitted_at,
            completed_at: Instant::now(),
            status,
        };
        self.in_flight.release();

        match self.completions.get(request.worker) {
            Some(tx) => {
                // A worker that already exited no longer cares
                let _ = tx.send(completion);
            }
            None => warn!(worker = request.worker, "completion for unknown worker"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{BlockDescriptor, BlockKind};
    use crate::util::buffer::PayloadPool;
    use tempfile::TempDir;

    /// Open a buffered backend, or `None` when the kernel refuses to create a ring
    fn open_or_skip(path: &Path, size: u64, backlog: usize, workers: usize) -> Option<IoUringBackend> {
        open_with(path, size, 4096, false, backlog, workers)
    }

    fn open_with(
        path: &Path,
        size: u64,
        block_size: u64,
        direct: bool,
        backlog: usize,
        workers: usize,
    ) -> Option<IoUringBackend> {
        match IoUringBackend::open(path, size, block_size, direct, backlog, workers) {
            Ok(backend) => Some(backend),
            Err(BenchError::Resource { what, source }) if what.contains("io_uring") => {
                eprintln!("skipping: io_uring unavailable ({})", source);
                None
            }
            Err(e) => panic!("unexpected error: {}", e),
        }
    }

    fn request(pool: &Arc<PayloadPool>, worker: usize, index: u64) -> WriteRequest {
        WriteRequest {
            worker,
            block: BlockDescriptor {
                offset: index * 4096,
                length: 4096,
                kind: BlockKind::Write,
            },
            payload: pool.payload(index as usize, 4096),
        }
    }

    fn wait_for(backend: &IoUringBackend, worker: usize, count: usize) -> Vec<Completion> {
        let mut reaped = Vec::new();
        let deadline = Instant::now() + Duration::from_secs(10);
        while reaped.len() < count && Instant::now() < deadline {
            reaped.extend(backend.poll_completions(worker, Duration::from_millis(100)).unwrap());
        }
        reaped
    }

    #[test]
    fn test_in_flight_limit() {
        let counter = InFlight::new(2);
        assert!(counter.try_acquire());
        assert!(counter.try_acquire());
        assert!(!counter.try_acquire());
        assert_eq!(counter.current(), 2);

        counter.release();
        assert!(counter.try_acquire());
        assert_eq!(counter.peak(), 2);
    }

    #[test]
    fn test_zero_backlog_is_config_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("zero.dat");
        assert!(matches!(
            IoUringBackend::open(&path, 4096, 4096, false, 0, 1),
            Err(BenchError::Config(_))
        ));
        assert!(!path.exists());
    }

    #[test]
    fn test_direct_alignment_against_device() {
        assert!(check_direct_alignment(4096, 1 << 20, 512).is_ok());
        assert!(check_direct_alignment(4096, 1 << 20, 4096).is_ok());

        // 512-byte writes on a 4 KiB-sector device
        assert!(matches!(
            check_direct_alignment(512, 1 << 20, 4096),
            Err(BenchError::Config(_))
        ));
        // Aligned blocks, but a short tail block
        assert!(matches!(
            check_direct_alignment(4096, (1 << 20) + 512, 4096),
            Err(BenchError::Config(_))
        ));
        // Larger than the payload buffers are aligned to
        assert!(matches!(
            check_direct_alignment(65536, 1 << 20, 65536),
            Err(BenchError::Config(_))
        ));
    }

    #[test]
    fn test_direct_open() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("direct.dat");
        let size = 1 << 20;
        let lbs = match TargetFile::create(&path, size, true) {
            Ok(target) => target.logical_block_size(),
            Err(e) => {
                eprintln!("skipping: O_DIRECT unavailable ({})", e);
                return;
            }
        };

        assert!(matches!(
            IoUringBackend::open(&path, size, lbs + lbs / 2, true, 8, 1),
            Err(BenchError::Config(_))
        ));
        if lbs > DIRECT_IO_ALIGNMENT as u64 {
            return;
        }

        let Some(backend) = open_with(&path, size, lbs, true, 8, 1) else {
            return;
        };
        let pool = PayloadPool::new(lbs as usize, 4, DIRECT_IO_ALIGNMENT, 3).unwrap();
        let payload = pool.payload(1, lbs as usize);
        let expected = payload.as_slice().to_vec();
        let request = WriteRequest {
            worker: 0,
            block: BlockDescriptor {
                offset: 2 * lbs,
                length: lbs as u32,
                kind: BlockKind::Write,
            },
            payload,
        };
        backend.submit(request).unwrap();

        let reaped = wait_for(&backend, 0, 1);
        assert_eq!(reaped.len(), 1);
        assert!(reaped[0].is_success());

        Box::new(backend).close().unwrap();
        let data = std::fs::read(&path).unwrap();
        let start = 2 * lbs as usize;
        assert_eq!(&data[start..start + lbs as usize], &expected[..]);
    }

    #[test]
    fn test_write_and_reap() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("uring.dat");
        let Some(backend) = open_or_skip(&path, 16 * 4096, 8, 1) else {
            return;
        };
        let pool = PayloadPool::new(4096, 16, DIRECT_IO_ALIGNMENT, 11).unwrap();

        let req = request(&pool, 0, 3);
        let expected = req.payload.as_slice().to_vec();
        assert!(matches!(backend.submit(req).unwrap(), Ticket::Submitted { .. }));

        let reaped = wait_for(&backend, 0, 1);
        assert_eq!(reaped.len(), 1);
        assert!(reaped[0].is_success());
        assert_eq!(reaped[0].block.offset, 3 * 4096);
        assert_eq!(backend.in_flight(), 0);

        Box::new(backend).close().unwrap();
        let data = std::fs::read(&path).unwrap();
        assert_eq!(&data[3 * 4096..4 * 4096], &expected[..]);
    }

    #[test]
    fn test_backlog_bounds_outstanding_requests() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bounded.dat");
        let Some(backend) = open_or_skip(&path, 256 * 4096, 4, 1) else {
            return;
        };
        let pool = PayloadPool::new(4096, 16, DIRECT_IO_ALIGNMENT, 5).unwrap();

        let mut next = 0;
        let mut done = 0;
        while done < 256 {
            if next < 256 {
                match backend.submit(request(&pool, 0, next)) {
                    Ok(_) => {
                        next += 1;
                        continue;
                    }
                    Err(e) if e.is_capacity() => {}
                    Err(e) => panic!("unexpected error: {}", e),
                }
            }
            for completion in backend.poll_completions(0, Duration::from_millis(50)).unwrap() {
                assert!(completion.is_success());
                done += 1;
            }
        }

        assert!(backend.peak_in_flight() <= 4);
        assert!(backend.peak_in_flight() >= 1);
        assert_eq!(backend.in_flight(), 0);
        Box::new(backend).close().unwrap();
    }

    #[test]
    fn test_completions_routed_per_worker() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("routed.dat");
        let Some(backend) = open_or_skip(&path, 8 * 4096, 8, 2) else {
            return;
        };
        let pool = PayloadPool::new(4096, 8, DIRECT_IO_ALIGNMENT, 5).unwrap();

        backend.submit(request(&pool, 1, 0)).unwrap();
        let reaped = wait_for(&backend, 1, 1);
        assert_eq!(reaped.len(), 1);
        assert_eq!(reaped[0].worker, 1);
        assert!(backend.poll_completions(0, Duration::ZERO).unwrap().is_empty());
        assert!(backend.poll_completions(7, Duration::ZERO).is_err());

        Box::new(backend).close().unwrap();
    }
}
