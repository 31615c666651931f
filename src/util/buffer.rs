//! Buffer management and alignment for high-performance IO
//!
//! This module provides memory-aligned buffers required for O_DIRECT operations
//! and the shared pool of random payload blocks that every write copies from.

use crate::error::BenchError;
use crate::Result;
use rand::{RngCore, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::fmt;
use std::io;
use std::ptr::NonNull;
use std::sync::Arc;

/// Buffer alignment that satisfies O_DIRECT on every common device
pub const DIRECT_IO_ALIGNMENT: usize = 4096;

/// Default number of distinct payload blocks in a pool
pub const DEFAULT_PAYLOAD_SLOTS: usize = 64;

/// Upper bound on the memory a payload pool may take
const MAX_POOL_BYTES: usize = 256 * 1024 * 1024;

/// Memory-aligned buffer suitable for O_DIRECT operations
///
/// This buffer ensures proper alignment (typically 512 or 4096 bytes)
/// required by O_DIRECT file operations. The memory is zero-initialized.
pub struct AlignedBuffer {
    ptr: NonNull<u8>,
    size: usize,
    layout: Layout,
}

// SAFETY: the buffer exclusively owns its allocation; shared access is
// read-only and mutation requires `&mut self`.
unsafe impl Send for AlignedBuffer {}
unsafe impl Sync for AlignedBuffer {}

impl AlignedBuffer {
    /// Allocate `size` zeroed bytes aligned to `alignment`
    ///
    /// # Errors
    ///
    /// Returns a configuration error for a zero size or a non power of two
    /// alignment, and a resource error if the allocator refuses.
    pub fn new(size: usize, alignment: usize) -> Result<Self> {
        if size == 0 {
            return Err(BenchError::config("buffer size must be greater than 0"));
        }
        let layout = Layout::from_size_align(size, alignment).map_err(|e| {
            BenchError::config(format!("invalid buffer layout ({} bytes, align {}): {}", size, alignment, e))
        })?;

        // SAFETY: the layout has a non-zero size.
        let ptr = unsafe { alloc_zeroed(layout) };
        let ptr = NonNull::new(ptr).ok_or_else(|| {
            BenchError::resource(
                format!("allocate {} byte buffer", size),
                io::Error::from(io::ErrorKind::OutOfMemory),
            )
        })?;

        Ok(Self { ptr, size, layout })
    }

    #[inline(always)]
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: ptr is valid for `size` initialized bytes for the lifetime of self.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.size) }
    }

    #[inline(always)]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: as above, and `&mut self` guarantees exclusive access.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.size) }
    }

    #[inline(always)]
    pub fn alignment(&self) -> usize {
        self.layout.align()
    }
}

impl Drop for AlignedBuffer {
    fn drop(&mut self) {
        // SAFETY: allocated in `new` with exactly this layout.
        unsafe { dealloc(self.ptr.as_ptr(), self.layout) };
    }
}

impl fmt::Debug for AlignedBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlignedBuffer")
            .field("size", &self.size)
            .field("alignment", &self.alignment())
            .finish()
    }
}

/// Read-only pool of random block payloads
///
/// One aligned allocation holds `slots` windows of `block_size` bytes. Window
/// starts are aligned to the pool alignment, so any window can be handed to
/// an O_DIRECT write. The pool is filled once and never written again, which
/// lets any number of in-flight requests point into it at the same time.
pub struct PayloadPool {
    buffer: AlignedBuffer,
    block_size: usize,
    slot_stride: usize,
    slots: usize,
}

impl PayloadPool {
    /// Build a pool of random blocks
    pub fn new(block_size: usize, slots: usize, alignment: usize, seed: u64) -> Result<Arc<Self>> {
        if block_size == 0 {
            return Err(BenchError::config("payload block size must be greater than 0"));
        }
        if !alignment.is_power_of_two() {
            return Err(BenchError::config(format!("alignment {} is not a power of two", alignment)));
        }

        let slot_stride = block_size
            .checked_next_multiple_of(alignment)
            .ok_or_else(|| BenchError::config(format!("block size {} is too large", block_size)))?;
        let max_slots = (MAX_POOL_BYTES / slot_stride).max(1);
        let slots = slots.clamp(1, max_slots);

        let total = slot_stride
            .checked_mul(slots)
            .ok_or_else(|| BenchError::config(format!("block size {} is too large", block_size)))?;
        let mut buffer = AlignedBuffer::new(total, alignment)?;

        let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
        rng.fill_bytes(buffer.as_mut_slice());

        Ok(Arc::new(Self {
            buffer,
            block_size,
            slot_stride,
            slots,
        }))
    }

    pub fn alignment(&self) -> usize {
        self.buffer.alignment()
    }

    /// Borrow the first `len` bytes of slot `slot % slots`
    ///
    /// # Panics
    ///
    /// Panics if `len` exceeds the block size.
    pub fn payload(self: &Arc<Self>, slot: usize, len: usize) -> Payload {
        assert!(len <= self.block_size, "payload of {} bytes exceeds block size {}", len, self.block_size);
        Payload {
            pool: Arc::clone(self),
            start: (slot % self.slots) * self.slot_stride,
            len,
        }
    }
}

impl fmt::Debug for PayloadPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PayloadPool")
            .field("block_size", &self.block_size)
            .field("slots", &self.slots)
            .field("alignment", &self.alignment())
            .finish()
    }
}

/// A window into a [`PayloadPool`]
///
/// Holding a `Payload` keeps the pool allocation alive, so the pointer stays
/// valid for as long as an asynchronous write that references it is in flight.
#[derive(Clone)]
pub struct Payload {
    pool: Arc<PayloadPool>,
    start: usize,
    len: usize,
}

impl Payload {
    pub fn as_slice(&self) -> &[u8] {
        &self.pool.buffer.as_slice()[self.start..self.start + self.len]
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.as_slice().as_ptr()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Payload {{ start: {}, len: {} }}", self.start, self.len)
    }
}
