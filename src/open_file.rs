//! The open-file table: a fixed array of handles, each carrying an i-node
//! number, a byte offset, and an append flag.
//!
//! Two lock tiers, matching [`crate::inode::table::InodeTable`]: an
//! admission lock (scan-for-free-slot, and the live-handle counter that
//! gates quiescent shutdown) and one lock per entry, which a transfer holds
//! for its whole duration so offset and the i-node's size move together.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use crate::block::BlockPool;
use crate::config::FsConfig;
use crate::delay::insert_delay;
use crate::error::{FsError, FsResult};
use crate::ids::{FileHandle, Inumber};
use crate::inode::content;
use crate::inode::table::InodeTable;

struct OpenFileSlot {
    in_use: bool,
    inumber: Inumber,
    offset: usize,
    append: bool,
}

impl OpenFileSlot {
    const fn empty() -> Self {
        Self {
            in_use: false,
            inumber: Inumber::ROOT,
            offset: 0,
            append: false,
        }
    }
}

struct Admission {
    live_handles: usize,
}

pub struct OpenFileTable {
    config: FsConfig,
    admission: Mutex<Admission>,
    quiescent: Condvar,
    entries: Vec<Mutex<OpenFileSlot>>,
}

impl OpenFileTable {
    #[must_use]
    pub fn new(config: FsConfig) -> Self {
        let entries = (0..config.max_open_files)
            .map(|_| Mutex::new(OpenFileSlot::empty()))
            .collect();
        Self {
            config,
            admission: Mutex::new(Admission { live_handles: 0 }),
            quiescent: Condvar::new(),
            entries,
        }
    }

    fn validate(&self, handle: FileHandle) -> FsResult<()> {
        if handle.as_index() < self.entries.len() {
            Ok(())
        } else {
            Err(FsError::InvalidHandle)
        }
    }

    fn lock_entry(&self, handle: FileHandle) -> MutexGuard<'_, OpenFileSlot> {
        self.entries[handle.as_index()]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_admission(&self) -> MutexGuard<'_, Admission> {
        self.admission
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Claims a free slot for `inumber`, under the admission lock so a
    /// concurrent scan never double-assigns one.
    pub fn add(&self, inumber: Inumber, append: bool) -> FsResult<FileHandle> {
        let mut admission = self.lock_admission();
        let stride = self.config.block_size.max(1);
        for i in 0..self.entries.len() {
            if i % stride == 0 {
                insert_delay(self.config.delay);
            }
            let mut slot = self.entries[i]
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if slot.in_use {
                continue;
            }
            slot.in_use = true;
            slot.inumber = inumber;
            slot.offset = 0;
            slot.append = append;
            admission.live_handles += 1;
            let handle = FileHandle::new(u32::try_from(i).expect("open-file index fits u32"));
            log::trace!("open_file_add: {handle} -> {inumber}");
            return Ok(handle);
        }
        log::warn!(
            "open_file_add: no free handles (table size {})",
            self.entries.len()
        );
        Err(FsError::NoFreeHandles)
    }

    /// Frees `handle`, waking [`Self::wait_until_quiescent`] if this was the
    /// last live handle.
    pub fn remove(&self, handle: FileHandle) -> FsResult<()> {
        self.validate(handle)?;
        let mut admission = self.lock_admission();
        let mut slot = self.lock_entry(handle);
        if !slot.in_use {
            return Err(FsError::InvalidHandle);
        }
        slot.in_use = false;
        drop(slot);
        admission.live_handles -= 1;
        log::trace!(
            "open_file_remove: {handle} freed, {} live",
            admission.live_handles
        );
        if admission.live_handles == 0 {
            self.quiescent.notify_all();
        }
        Ok(())
    }

    /// Blocks until no handle is open. Rechecks the predicate under the lock
    /// in a loop, unlike the source this engine is modeled on, which waits
    /// once unconditionally and can lose a wakeup to a spurious signal.
    pub fn wait_until_quiescent(&self) {
        let admission = self.lock_admission();
        let _admission = self
            .quiescent
            .wait_while(admission, |a| a.live_handles > 0)
            .unwrap_or_else(PoisonError::into_inner);
    }

    /// Transfers up to `data.len()` bytes into the file, extending it with
    /// freshly allocated blocks as needed. Holds the entry lock, then the
    /// i-node's write-lock, for the whole transfer.
    pub fn write(
        &self,
        handle: FileHandle,
        inode_table: &InodeTable,
        pool: &BlockPool,
        data: &[u8],
    ) -> FsResult<usize> {
        self.validate(handle)?;
        let mut slot = self.lock_entry(handle);
        if !slot.in_use {
            return Err(FsError::InvalidHandle);
        }
        let mut guard = inode_table.lock_write(slot.inumber)?;
        if slot.append {
            slot.offset = guard.size;
        }
        if slot.offset > guard.size {
            return Err(FsError::OffsetBeyondEnd);
        }

        let remaining_capacity = self.config.max_file_size().saturating_sub(slot.offset);
        let count = data.len().min(remaining_capacity);
        let mut written = 0;
        while written < count {
            let logical_block = slot.offset / self.config.block_size;
            let in_block_offset = slot.offset % self.config.block_size;
            let physical = if logical_block == guard.block_count {
                content::extend(&mut guard, pool, &self.config)?
            } else {
                content::get_block(&guard, pool, &self.config, logical_block)?
            };
            let bytes = pool.write(&mut guard, physical)?;
            let chunk = (count - written).min(self.config.block_size - in_block_offset);
            bytes[in_block_offset..in_block_offset + chunk]
                .copy_from_slice(&data[written..written + chunk]);
            written += chunk;
            slot.offset += chunk;
        }
        if slot.offset > guard.size {
            guard.size = slot.offset;
        }
        Ok(written)
    }

    /// Transfers up to `buf.len()` bytes from the file. Holds the entry
    /// lock, then the i-node's read-lock, for the whole transfer.
    pub fn read(
        &self,
        handle: FileHandle,
        inode_table: &InodeTable,
        pool: &BlockPool,
        buf: &mut [u8],
    ) -> FsResult<usize> {
        self.validate(handle)?;
        let mut slot = self.lock_entry(handle);
        if !slot.in_use {
            return Err(FsError::InvalidHandle);
        }
        let guard = inode_table.lock_read(slot.inumber)?;
        if slot.append {
            slot.offset = guard.size;
        }
        if slot.offset > guard.size {
            return Err(FsError::OffsetBeyondEnd);
        }

        let count = buf.len().min(guard.size - slot.offset);
        let mut transferred = 0;
        while transferred < count {
            let logical_block = slot.offset / self.config.block_size;
            let in_block_offset = slot.offset % self.config.block_size;
            let physical = content::get_block(&guard, pool, &self.config, logical_block)?;
            let bytes = pool.read(&guard, physical)?;
            let chunk = (count - transferred).min(self.config.block_size - in_block_offset);
            buf[transferred..transferred + chunk]
                .copy_from_slice(&bytes[in_block_offset..in_block_offset + chunk]);
            transferred += chunk;
            slot.offset += chunk;
        }
        Ok(transferred)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inode::InodeType;

    fn harness() -> (OpenFileTable, InodeTable, BlockPool, Inumber) {
        let config = FsConfig {
            block_size: 16,
            data_blocks: 64,
            inode_table_size: 8,
            max_open_files: 4,
            inode_direct_refs: 2,
            ..FsConfig::DEFAULT
        };
        let pool = BlockPool::new(config);
        let inode_table = InodeTable::new(config);
        let file = inode_table.create(InodeType::File, &pool).unwrap();
        (OpenFileTable::new(config), inode_table, pool, file)
    }

    #[test]
    fn write_then_read_round_trips() {
        let (oft, inode_table, pool, file) = harness();
        let handle = oft.add(file, false).unwrap();
        let written = oft
            .write(handle, &inode_table, &pool, b"hello world")
            .unwrap();
        assert_eq!(written, 11);
        oft.remove(handle).unwrap();

        let handle = oft.add(file, false).unwrap();
        let mut buf = [0u8; 11];
        let read = oft.read(handle, &inode_table, &pool, &mut buf).unwrap();
        assert_eq!(read, 11);
        assert_eq!(&buf, b"hello world");
    }

    #[test]
    fn read_past_end_of_shrunk_file_fails() {
        let (oft, inode_table, pool, file) = harness();
        let a = oft.add(file, false).unwrap();
        oft.write(a, &inode_table, &pool, b"x").unwrap();

        inode_table.clear(file, &pool).unwrap();

        let mut buf = [0u8; 1];
        assert_eq!(
            oft.read(a, &inode_table, &pool, &mut buf),
            Err(FsError::OffsetBeyondEnd)
        );
    }

    #[test]
    fn exhausting_handles_fails() {
        let (oft, _inode_table, _pool, file) = harness();
        for _ in 0..4 {
            oft.add(file, false).unwrap();
        }
        assert_eq!(oft.add(file, false), Err(FsError::NoFreeHandles));
    }

    #[test]
    fn removing_last_handle_wakes_quiescent_wait() {
        let (oft, _inode_table, _pool, file) = harness();
        let handle = oft.add(file, false).unwrap();
        std::thread::scope(|scope| {
            scope.spawn(|| {
                std::thread::sleep(std::time::Duration::from_millis(20));
                oft.remove(handle).unwrap();
            });
            oft.wait_until_quiescent();
        });
    }
}
