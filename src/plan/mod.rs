//! Workload planning
//!
//! A [`WorkloadPlan`] splits `[0, size)` into block-sized descriptors and tags
//! each one as a write or a skip. Which blocks get written is decided by a
//! seeded random sample of block indices, so data and holes are interleaved
//! across the whole file rather than forming one contiguous run, and the same
//! inputs always produce the same plan.
//!
//! The plan stores one bit per block; descriptors are materialized on demand.
//!
//! # Example
//!
//! ```
//! use holebench::plan::{BlockKind, WorkloadPlan};
//!
//! let plan = WorkloadPlan::new(1024 * 1024, 4096, 0.5, 42).unwrap();
//! assert_eq!(plan.block_count(), 256);
//! assert_eq!(plan.write_count(), 128);
//!
//! let writes = plan.iter().filter(|b| b.kind == BlockKind::Write).count();
//! assert_eq!(writes, 128);
//! ```

use crate::config::validator::validate_ratio;
use crate::error::BenchError;
use crate::Result;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;
use std::ops::Range;

/// Whether a block receives a write or is left as a hole
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockKind {
    Write,
    Skip,
}

/// One block of the file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockDescriptor {
    /// Byte offset, a multiple of the block size
    pub offset: u64,
    /// Block length; shorter than the block size only for the final block
    pub length: u32,
    pub kind: BlockKind,
}

impl BlockDescriptor {
    pub fn is_write(&self) -> bool {
        self.kind == BlockKind::Write
    }

    /// One past the last byte covered by this block
    pub fn end(&self) -> u64 {
        self.offset + self.length as u64
    }
}

/// Number of write blocks for `block_count` blocks at `ratio`
///
/// Rounds half up, so 3 blocks at 0.5 give 2 writes.
pub fn target_write_count(block_count: u64, ratio: f64) -> u64 {
    let exact = block_count as f64 * ratio;
    let rounded = (exact + 0.5).floor();
    if rounded <= 0.0 {
        0
    } else {
        (rounded as u64).min(block_count)
    }
}

/// Immutable block layout of one run
#[derive(Debug, Clone)]
pub struct WorkloadPlan {
    size: u64,
    block_size: u64,
    block_count: u64,
    write_count: u64,
    seed: u64,
    /// One bit per block, set for writes
    writes: Vec<u64>,
}

impl WorkloadPlan {
    /// Plan a run over `size` bytes in `block_size` blocks, writing
    /// `round(block_count * ratio)` of them
    pub fn new(size: u64, block_size: u64, ratio: f64, seed: u64) -> Result<Self> {
        validate_ratio(ratio)?;
        if block_size == 0 {
            return Err(BenchError::config("bs must be at least 1 byte"));
        }
        if block_size > u32::MAX as u64 {
            return Err(BenchError::config(format!("bs {} does not fit into 32 bits", block_size)));
        }

        let block_count = size.div_ceil(block_size);
        let count = usize::try_from(block_count).map_err(|_| {
            BenchError::config(format!("{} blocks do not fit into the address space", block_count))
        })?;
        let write_count = target_write_count(block_count, ratio);

        let mut writes = vec![0u64; count.div_ceil(64)];
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);

        // Sample whichever set is smaller and derive the other one
        let invert = write_count > block_count / 2;
        let amount = if invert { block_count - write_count } else { write_count } as usize;
        if invert {
            for index in 0..count {
                set_bit(&mut writes, index);
            }
        }
        for index in rand::seq::index::sample(&mut rng, count, amount).into_iter() {
            if invert {
                clear_bit(&mut writes, index);
            } else {
                set_bit(&mut writes, index);
            }
        }

        Ok(Self {
            size,
            block_size,
            block_count,
            write_count,
            seed,
            writes,
        })
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Number of descriptors, `ceil(size / block_size)`
    pub fn block_count(&self) -> u64 {
        self.block_count
    }

    pub fn write_count(&self) -> u64 {
        self.write_count
    }

    pub fn skip_count(&self) -> u64 {
        self.block_count - self.write_count
    }

    /// Total bytes covered by write blocks
    pub fn write_bytes(&self) -> u64 {
        if self.block_count == 0 {
            return 0;
        }
        let last = self.block_count - 1;
        let full = self.block_size * self.write_count;
        if self.kind_of(last) == BlockKind::Write {
            // The final block may be truncated
            full - self.block_size + self.length_of(last) as u64
        } else {
            full
        }
    }

    /// Descriptor for block `index`
    ///
    /// # Panics
    ///
    /// Panics if `index >= block_count()`.
    pub fn descriptor(&self, index: u64) -> BlockDescriptor {
        assert!(index < self.block_count, "block {} out of range", index);
        BlockDescriptor {
            offset: index * self.block_size,
            length: self.length_of(index),
            kind: self.kind_of(index),
        }
    }

    /// All descriptors in offset order
    pub fn iter(&self) -> impl Iterator<Item = BlockDescriptor> + '_ {
        self.iter_range(0..self.block_count)
    }

    /// Descriptors for a range of block indices
    pub fn iter_range(&self, range: Range<u64>) -> impl Iterator<Item = BlockDescriptor> + '_ {
        let end = range.end.min(self.block_count);
        (range.start..end).map(move |index| self.descriptor(index))
    }

    /// Split the block indices into `parts` contiguous, disjoint ranges
    ///
    /// Range lengths differ by at most one. With more parts than blocks the
    /// trailing ranges are empty.
    pub fn partition(&self, parts: usize) -> Vec<Range<u64>> {
        let parts = parts.max(1) as u64;
        let base = self.block_count / parts;
        let extra = self.block_count % parts;

        let mut ranges = Vec::with_capacity(parts as usize);
        let mut start = 0;
        for part in 0..parts {
            let len = base + u64::from(part < extra);
            ranges.push(start..start + len);
            start += len;
        }
        ranges
    }

    fn kind_of(&self, index: u64) -> BlockKind {
        let index = index as usize;
        if self.writes[index / 64] & (1 << (index % 64)) != 0 {
            BlockKind::Write
        } else {
            BlockKind::Skip
        }
    }

    fn length_of(&self, index: u64) -> u32 {
        let start = index * self.block_size;
        (self.size - start).min(self.block_size) as u32
    }
}

fn set_bit(bits: &mut [u64], index: usize) {
    bits[index / 64] |= 1 << (index % 64);
}

fn clear_bit(bits: &mut [u64], index: usize) {
    bits[index / 64] &= !(1 << (index % 64));
}

#[cfg(test)]
mod tests {
    use super::*;

    const KIB: u64 = 1024;
    const MIB: u64 = 1024 * 1024;

    fn assert_covers(plan: &WorkloadPlan) {
        let mut expected = 0;
        let mut blocks = 0;
        for block in plan.iter() {
            assert_eq!(block.offset, expected, "gap or overlap at block {}", blocks);
            assert_eq!(block.offset % plan.block_size(), 0);
            assert!(block.length > 0);
            expected = block.end();
            blocks += 1;
        }
        assert_eq!(expected, plan.size());
        assert_eq!(blocks, plan.block_count());
    }

    #[test]
    fn test_reference_scenario() {
        let plan = WorkloadPlan::new(MIB, 4 * KIB, 0.5, 42).unwrap();
        assert_eq!(plan.block_count(), 256);
        assert_eq!(plan.write_count(), 128);
        assert_eq!(plan.skip_count(), 128);
        assert_covers(&plan);

        let kinds: Vec<BlockKind> = plan.iter().map(|b| b.kind).collect();
        let first_half_writes = kinds[..128].iter().all(|k| *k == BlockKind::Write);
        let last_half_writes = kinds[128..].iter().all(|k| *k == BlockKind::Write);
        assert!(!first_half_writes && !last_half_writes);

        // A random half should flip between data and hole many times
        let transitions = kinds.windows(2).filter(|w| w[0] != w[1]).count();
        assert!(transitions > 32, "only {} transitions", transitions);
    }

    #[test]
    fn test_deterministic() {
        let a = WorkloadPlan::new(8 * MIB, 4 * KIB, 0.3, 7).unwrap();
        let b = WorkloadPlan::new(8 * MIB, 4 * KIB, 0.3, 7).unwrap();
        assert!(a.iter().eq(b.iter()));

        let c = WorkloadPlan::new(8 * MIB, 4 * KIB, 0.3, 8).unwrap();
        assert!(!a.iter().eq(c.iter()));
        assert_eq!(a.write_count(), c.write_count());
    }

    #[test]
    fn test_ratio_extremes() {
        let none = WorkloadPlan::new(MIB, 4 * KIB, 0.0, 1).unwrap();
        assert_eq!(none.iter().filter(|b| b.is_write()).count(), 0);
        assert_eq!(none.write_bytes(), 0);

        let all = WorkloadPlan::new(MIB, 4 * KIB, 1.0, 1).unwrap();
        assert_eq!(all.iter().filter(|b| !b.is_write()).count(), 0);
        assert_eq!(all.write_bytes(), MIB);
    }

    #[test]
    fn test_truncated_final_block() {
        let size = 10 * 4096 + 100;
        let plan = WorkloadPlan::new(size, 4096, 1.0, 3).unwrap();
        assert_eq!(plan.block_count(), 11);
        assert_covers(&plan);

        let last = plan.descriptor(10);
        assert_eq!(last.offset, 40960);
        assert_eq!(last.length, 100);
        assert_eq!(plan.write_bytes(), size);
    }

    #[test]
    fn test_write_count_matches_rounding_for_many_inputs() {
        let sizes = [1, 4095, 4096, 4097, 100_000, 3 * MIB + 17];
        let ratios = [0.0, 0.1, 0.25, 0.5, 0.333, 0.75, 0.99, 1.0];
        for &size in &sizes {
            for &ratio in &ratios {
                let plan = WorkloadPlan::new(size, 4096, ratio, 99).unwrap();
                let writes = plan.iter().filter(|b| b.is_write()).count() as u64;
                assert_eq!(writes, target_write_count(plan.block_count(), ratio));
                assert_eq!(writes + plan.skip_count(), plan.block_count());

                let bytes: u64 = plan
                    .iter()
                    .filter(|b| b.is_write())
                    .map(|b| b.length as u64)
                    .sum();
                assert_eq!(bytes, plan.write_bytes());
                assert_covers(&plan);
            }
        }
    }

    #[test]
    fn test_round_half_up() {
        assert_eq!(target_write_count(3, 0.5), 2);
        assert_eq!(target_write_count(1, 0.5), 1);
        assert_eq!(target_write_count(10, 0.25), 3);
        assert_eq!(target_write_count(10, 0.24), 2);
        assert_eq!(target_write_count(0, 1.0), 0);
        assert_eq!(target_write_count(7, 1.0), 7);
    }

    #[test]
    fn test_invalid_inputs() {
        assert!(WorkloadPlan::new(MIB, 4096, 1.5, 0).is_err());
        assert!(WorkloadPlan::new(MIB, 4096, -0.5, 0).is_err());
        assert!(WorkloadPlan::new(MIB, 0, 0.5, 0).is_err());
    }

    #[test]
    fn test_partition_is_disjoint_and_complete() {
        let plan = WorkloadPlan::new(MIB, 4096, 0.5, 42).unwrap();
        for parts in [1, 2, 3, 7, 256, 300] {
            let ranges = plan.partition(parts);
            assert_eq!(ranges.len(), parts);

            let mut next = 0;
            for range in &ranges {
                assert_eq!(range.start, next);
                next = range.end;
            }
            assert_eq!(next, plan.block_count());

            let longest = ranges.iter().map(|r| r.end - r.start).max().unwrap();
            let shortest = ranges.iter().map(|r| r.end - r.start).min().unwrap();
            assert!(longest - shortest <= 1);
        }
    }

    #[test]
    fn test_iter_range_clamps() {
        let plan = WorkloadPlan::new(16 * 4096, 4096, 0.5, 1).unwrap();
        assert_eq!(plan.iter_range(10..100).count(), 6);
        assert_eq!(plan.iter_range(20..30).count(), 0);
    }
}
