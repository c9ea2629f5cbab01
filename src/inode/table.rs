use std::sync::{
    Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, TryLockError,
};

use crate::block::{BlockAccessProof, BlockPool};
use crate::config::FsConfig;
use crate::delay::insert_delay;
use crate::error::{FsError, FsResult};
use crate::ids::Inumber;

use super::{InodeSlot, InodeType, content};

/// One table-level lock serializes allocation, deletion, and
/// `create_in_dir` (see [`super::directory::create_in_dir`]); one
/// reader-writer lock per slot serializes content access. The only
/// permitted acquisition order is table lock, then a slot lock, then the
/// block pool lock.
pub struct InodeTable {
    config: FsConfig,
    table_lock: Mutex<()>,
    slots: Vec<RwLock<InodeSlot>>,
}

impl InodeTable {
    #[must_use]
    pub fn new(config: FsConfig) -> Self {
        let slots = (0..config.inode_table_size)
            .map(|_| RwLock::new(InodeSlot::empty(config.inode_direct_refs)))
            .collect();
        Self {
            config,
            table_lock: Mutex::new(()),
            slots,
        }
    }

    fn validate(&self, inumber: Inumber) -> FsResult<()> {
        if inumber.as_index() < self.slots.len() {
            Ok(())
        } else {
            Err(FsError::InvalidInumber)
        }
    }

    pub(crate) fn lock_read(&self, inumber: Inumber) -> FsResult<InodeReadGuard<'_>> {
        self.validate(inumber)?;
        insert_delay(self.config.delay);
        let guard = self.slots[inumber.as_index()]
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        Ok(InodeReadGuard { guard })
    }

    pub(crate) fn lock_write(&self, inumber: Inumber) -> FsResult<InodeWriteGuard<'_>> {
        self.validate(inumber)?;
        insert_delay(self.config.delay);
        let guard = self.slots[inumber.as_index()]
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        Ok(InodeWriteGuard { guard, inumber })
    }

    /// Serializes allocation, deletion, and `create_in_dir` against each
    /// other. Held only for the duration of the scan/publish, never across a
    /// call into the block pool's content accessors.
    pub(super) fn lock_table(&self) -> MutexGuard<'_, ()> {
        self.table_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Allocates and initializes a new i-node.
    pub fn create(&self, ty: InodeType, pool: &BlockPool) -> FsResult<Inumber> {
        let _table_guard = self.lock_table();
        self.allocate_locked(ty, pool)
    }

    /// Allocation logic shared with [`super::directory::create_in_dir`],
    /// which already holds the table lock — and, for the parent directory
    /// it is publishing into, that slot's write lock — when it needs a
    /// fresh i-node. A slot whose lock cannot be acquired without blocking
    /// is necessarily in use (by the caller itself, or by a reader/writer
    /// that only ever touches an allocated slot), so a failed `try_write`
    /// is treated the same as a `TAKEN` slot rather than awaited.
    pub(super) fn allocate_locked(&self, ty: InodeType, pool: &BlockPool) -> FsResult<Inumber> {
        let stride = self.config.block_size.max(1);
        for i in 0..self.slots.len() {
            if i % stride == 0 {
                insert_delay(self.config.delay);
            }
            let mut guard = match self.slots[i].try_write() {
                Ok(guard) => guard,
                Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
                Err(TryLockError::WouldBlock) => continue,
            };
            if guard.in_use {
                continue;
            }
            guard.in_use = true;
            guard.ty = ty;
            guard.size = 0;
            guard.block_count = 0;
            guard.indirect_block = None;
            guard.direct_refs.iter_mut().for_each(|r| *r = None);

            let inumber = Inumber::new(u32::try_from(i).expect("inode index fits u32"));
            if ty.is_directory() {
                let mut wrapped = InodeWriteGuard { guard, inumber };
                if let Err(err) = content::init_directory(&mut wrapped, pool, &self.config) {
                    wrapped.guard.in_use = false;
                    log::warn!("inode_create: failed to initialize directory {inumber}: {err}");
                    return Err(err);
                }
            }
            log::trace!("inode_create: allocated {inumber} as {ty}");
            return Ok(inumber);
        }
        log::warn!(
            "inode_create: no free inodes (table size {})",
            self.slots.len()
        );
        Err(FsError::NoFreeInodes)
    }

    /// Releases every data block owned by the i-node and resets its size and
    /// block count to zero, without freeing the slot itself.
    pub fn clear(&self, inumber: Inumber, pool: &BlockPool) -> FsResult<()> {
        let mut guard = self.lock_write(inumber)?;
        content::clear(&mut guard, pool)
    }

    pub(super) fn delete_locked(&self, inumber: Inumber, pool: &BlockPool) -> FsResult<()> {
        let mut guard = self.lock_write(inumber)?;
        content::clear(&mut guard, pool)?;
        guard.guard.in_use = false;
        log::trace!("inode_delete: freed {inumber}");
        Ok(())
    }
}

/// Proof that the caller holds an i-node's reader-writer lock for reading,
/// borrowed by [`BlockPool::read`](crate::block::BlockPool::read) so a block
/// buffer can never be reached without it.
pub(crate) struct InodeReadGuard<'a> {
    guard: RwLockReadGuard<'a, InodeSlot>,
}

impl BlockAccessProof for InodeReadGuard<'_> {}

impl std::ops::Deref for InodeReadGuard<'_> {
    type Target = InodeSlot;

    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}

/// Proof that the caller holds an i-node's reader-writer lock exclusively.
pub(crate) struct InodeWriteGuard<'a> {
    guard: RwLockWriteGuard<'a, InodeSlot>,
    inumber: Inumber,
}

impl BlockAccessProof for InodeWriteGuard<'_> {}

impl std::ops::Deref for InodeWriteGuard<'_> {
    type Target = InodeSlot;

    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}

impl std::ops::DerefMut for InodeWriteGuard<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.guard
    }
}

impl InodeWriteGuard<'_> {
    #[must_use]
    pub fn inumber(&self) -> Inumber {
        self.inumber
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BlockPool;

    fn small() -> (InodeTable, BlockPool) {
        let config = FsConfig {
            inode_table_size: 4,
            data_blocks: 16,
            inode_direct_refs: 2,
            block_size: 32,
            ..FsConfig::DEFAULT
        };
        (InodeTable::new(config), BlockPool::new(config))
    }

    #[test]
    fn create_allocates_first_free_slot() {
        let (table, pool) = small();
        let root = table.create(InodeType::Directory, &pool).unwrap();
        assert_eq!(root, Inumber::ROOT);
        let file = table.create(InodeType::File, &pool).unwrap();
        assert_eq!(file, Inumber::new(1));
    }

    #[test]
    fn exhausting_table_fails() {
        let (table, pool) = small();
        for _ in 0..4 {
            table.create(InodeType::File, &pool).unwrap();
        }
        assert_eq!(
            table.create(InodeType::File, &pool),
            Err(FsError::NoFreeInodes)
        );
    }

    #[test]
    fn delete_locked_frees_slot_for_reuse() {
        let (table, pool) = small();
        let a = table.create(InodeType::File, &pool).unwrap();
        {
            let _table_guard = table.lock_table();
            table.delete_locked(a, &pool).unwrap();
        }
        let b = table.create(InodeType::File, &pool).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn clear_on_free_slot_fails() {
        let (table, pool) = small();
        assert_eq!(
            table.clear(Inumber::new(2), &pool),
            Err(FsError::InvalidInumber)
        );
    }
}
