//! The block pool: a fixed-size array of fixed-size data blocks with a free
//! bitmap guarded by a single lock.
//!
//! Block *contents* are deliberately not behind that lock — the spec requires
//! callers to serialize content access through the owning i-node's lock
//! instead, so two operations on different inodes never contend on block
//! reads/writes. [`BlockPool::read`] and [`BlockPool::write`] enforce this at
//! compile time: they borrow a proof of that inode lock (see
//! [`crate::inode::table::InodeReadGuard`]/[`InodeWriteGuard`]) and tie the
//! returned slice's lifetime to it, generalizing the source's raw
//! `data_block_get` pointer into a lock-scoped borrow (see DESIGN.md).

use std::cell::UnsafeCell;
use std::sync::Mutex;

use crate::config::FsConfig;
use crate::delay::insert_delay;
use crate::error::{FsError, FsResult};
use crate::ids::BlockIndex;

/// Number of bitmap entries touched between simulated storage-access delays,
/// matching the original's "every `BLOCK_SIZE / sizeof(state)` entries".
fn scan_delay_stride(config: &FsConfig) -> usize {
    config.block_size.max(1)
}

pub struct BlockPool {
    config: FsConfig,
    bitmap: Mutex<Vec<bool>>,
    blocks: Vec<UnsafeCell<Box<[u8]>>>,
}

// SAFETY: `blocks` is never resized or reallocated after construction, and
// every access to a given cell is serialized by the lock of the i-node that
// owns the block (enforced by the `InodeReadGuard`/`InodeWriteGuard` proof
// parameters on `read`/`write`, not by `BlockPool` itself).
unsafe impl Sync for BlockPool {}

impl BlockPool {
    #[must_use]
    pub fn new(config: FsConfig) -> Self {
        let blocks = (0..config.data_blocks)
            .map(|_| UnsafeCell::new(vec![0u8; config.block_size].into_boxed_slice()))
            .collect();
        Self {
            config,
            bitmap: Mutex::new(vec![false; config.data_blocks]),
            blocks,
        }
    }

    fn validate(&self, index: BlockIndex) -> FsResult<()> {
        if index.as_index() < self.blocks.len() {
            Ok(())
        } else {
            Err(FsError::NoFreeBlocks)
        }
    }

    /// Scans the free bitmap for the first free slot, marks it taken, and
    /// returns its index.
    pub fn alloc(&self) -> FsResult<BlockIndex> {
        let stride = scan_delay_stride(&self.config);
        let mut bitmap = self
            .bitmap
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        for (i, taken) in bitmap.iter_mut().enumerate() {
            if i % stride == 0 {
                insert_delay(self.config.delay);
            }
            if !*taken {
                *taken = true;
                log::trace!("block_alloc: block {i} taken");
                return Ok(BlockIndex::new(
                    u32::try_from(i).expect("block index fits u32"),
                ));
            }
        }
        log::warn!("block_alloc: no free blocks (pool size {})", bitmap.len());
        Err(FsError::NoFreeBlocks)
    }

    /// Marks a block free. Callers must free each allocated block exactly
    /// once; freeing an already-free block is not checked.
    pub fn free(&self, index: BlockIndex) -> FsResult<()> {
        self.validate(index)?;
        insert_delay(self.config.delay);
        let mut bitmap = self
            .bitmap
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        bitmap[index.as_index()] = false;
        log::trace!("block_free: block {index} freed");
        Ok(())
    }

    /// Borrows a block's contents for reading. The caller must hold the
    /// owning i-node's read (or write) lock; `proof` exists only to tie the
    /// returned slice's lifetime to that lock being held.
    pub fn read<'g>(
        &self,
        proof: &'g dyn BlockAccessProof,
        index: BlockIndex,
    ) -> FsResult<&'g [u8]> {
        let _ = proof;
        self.validate(index)?;
        insert_delay(self.config.delay);
        // SAFETY: see the `Sync` impl above: the caller holds the owning
        // i-node's lock for the duration of `'g`, so no other thread can
        // reach this block's `UnsafeCell` concurrently.
        Ok(unsafe { &*self.blocks[index.as_index()].get() })
    }

    /// Borrows a block's contents for writing. The caller must hold the
    /// owning i-node's write lock.
    pub fn write<'g>(
        &self,
        proof: &'g mut dyn BlockAccessProof,
        index: BlockIndex,
    ) -> FsResult<&'g mut [u8]> {
        let _ = proof;
        self.validate(index)?;
        insert_delay(self.config.delay);
        // SAFETY: see `read` above; `&mut` access is additionally exclusive
        // because the proof was borrowed mutably, so no other live borrow of
        // this same slice can exist for `'g`.
        Ok(unsafe { &mut *self.blocks[index.as_index()].get() })
    }
}

/// Marker trait implemented only by the i-node lock guards, so
/// [`BlockPool::read`]/[`BlockPool::write`] cannot be called without one in
/// hand. See the module docs for why this is sound.
pub trait BlockAccessProof {}

#[cfg(test)]
mod tests {
    use super::*;

    struct TestProof;
    impl BlockAccessProof for TestProof {}

    #[test]
    fn alloc_then_free_then_realloc_reuses_index() {
        let pool = BlockPool::new(FsConfig {
            data_blocks: 4,
            ..FsConfig::DEFAULT
        });
        let a = pool.alloc().unwrap();
        let b = pool.alloc().unwrap();
        assert_ne!(a, b);
        pool.free(a).unwrap();
        let c = pool.alloc().unwrap();
        assert_eq!(a, c);
    }

    #[test]
    fn alloc_exhausts_pool() {
        let pool = BlockPool::new(FsConfig {
            data_blocks: 2,
            ..FsConfig::DEFAULT
        });
        pool.alloc().unwrap();
        pool.alloc().unwrap();
        assert!(pool.alloc().is_err());
    }

    #[test]
    fn read_write_round_trips_through_proof() {
        let pool = BlockPool::new(FsConfig {
            data_blocks: 1,
            block_size: 16,
            ..FsConfig::DEFAULT
        });
        let idx = pool.alloc().unwrap();
        let mut proof = TestProof;
        pool.write(&mut proof, idx).unwrap()[0] = 42;
        assert_eq!(pool.read(&proof, idx).unwrap()[0], 42);
    }
}
