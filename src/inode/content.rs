//! Extent indirection: translating a logical block index into a physical
//! one, and the allocate/release machinery that grows and shrinks an
//! i-node's extent list.
//!
//! An i-node owns up to `inode_direct_refs` block indices inline and, once
//! that fills up, one indirection block holding up to `max_indirect_refs`
//! more 32-bit indices — an arena-of-blocks-plus-indices model with no
//! pointer graphs, per DESIGN.md.

use crate::block::{BlockAccessProof, BlockPool};
use crate::config::FsConfig;
use crate::error::{FsError, FsResult};
use crate::ids::BlockIndex;

use super::InodeSlot;
use super::table::{InodeReadGuard, InodeWriteGuard};

const BLOCK_INDEX_BYTES: usize = 4;

fn decode_index(bytes: &[u8]) -> BlockIndex {
    BlockIndex::new(u32::from_le_bytes(bytes.try_into().expect("4-byte slice")))
}

fn encode_index(index: BlockIndex) -> [u8; BLOCK_INDEX_BYTES] {
    index.get().to_le_bytes()
}

/// Implemented by both i-node lock guards so read-only extent lookups work
/// the same whether the caller holds the slot for reading or for writing.
pub(crate) trait InodeProof: BlockAccessProof {
    fn slot(&self) -> &InodeSlot;
}

impl InodeProof for InodeReadGuard<'_> {
    fn slot(&self) -> &InodeSlot {
        self
    }
}

impl InodeProof for InodeWriteGuard<'_> {
    fn slot(&self) -> &InodeSlot {
        self
    }
}

/// Translates a logical block index into a physical block index.
pub(crate) fn get_block<P: InodeProof>(
    proof: &P,
    pool: &BlockPool,
    config: &FsConfig,
    logical_index: usize,
) -> FsResult<BlockIndex> {
    let slot = proof.slot();
    if logical_index >= slot.block_count {
        return Err(FsError::OffsetBeyondEnd);
    }
    if logical_index < config.inode_direct_refs {
        return slot.direct_refs[logical_index].ok_or(FsError::OffsetBeyondEnd);
    }
    let indirect_block = slot.indirect_block.ok_or(FsError::OffsetBeyondEnd)?;
    let bytes = pool.read(proof, indirect_block)?;
    let pos = (logical_index - config.inode_direct_refs) * BLOCK_INDEX_BYTES;
    Ok(decode_index(&bytes[pos..pos + BLOCK_INDEX_BYTES]))
}

/// Allocates the next logical block for the i-node, allocating the
/// indirection block too if this is the first reference to overflow the
/// direct refs. Both allocations must succeed, or whatever was allocated is
/// freed before returning the error.
pub(crate) fn extend(
    guard: &mut InodeWriteGuard<'_>,
    pool: &BlockPool,
    config: &FsConfig,
) -> FsResult<BlockIndex> {
    let max_blocks = config.inode_direct_refs + config.max_indirect_refs();
    if guard.block_count >= max_blocks {
        return Err(FsError::FileTooLarge);
    }

    let new_block = pool.alloc()?;

    if guard.block_count < config.inode_direct_refs {
        let slot = guard.block_count;
        guard.direct_refs[slot] = Some(new_block);
    } else {
        if guard.block_count == config.inode_direct_refs {
            let indirect_block = match pool.alloc() {
                Ok(b) => b,
                Err(err) => {
                    let _ = pool.free(new_block);
                    return Err(err);
                }
            };
            guard.indirect_block = Some(indirect_block);
        }
        let indirect_block = guard
            .indirect_block
            .expect("indirect block was just allocated or already present");
        let pos = (guard.block_count - config.inode_direct_refs) * BLOCK_INDEX_BYTES;
        let bytes = pool.write(guard, indirect_block)?;
        bytes[pos..pos + BLOCK_INDEX_BYTES].copy_from_slice(&encode_index(new_block));
    }

    guard.block_count += 1;
    log::trace!(
        "inode_extend: {} now has {} block(s), new block {new_block}",
        guard.inumber(),
        guard.block_count
    );
    Ok(new_block)
}

/// Frees every data block owned by the i-node — direct refs first, then the
/// indirection entries, then the indirection block itself — and resets size
/// and block count to zero. Fails if the slot is not allocated.
pub(crate) fn clear(guard: &mut InodeWriteGuard<'_>, pool: &BlockPool) -> FsResult<()> {
    if !guard.in_use {
        return Err(FsError::InvalidInumber);
    }

    let direct_count = guard.block_count.min(guard.direct_refs.len());
    for slot in &mut guard.direct_refs[..direct_count] {
        if let Some(block) = slot.take() {
            pool.free(block)?;
        }
    }

    if guard.block_count > guard.direct_refs.len() {
        let indirect_block = guard
            .indirect_block
            .take()
            .expect("indirect block present when block_count exceeds direct refs");
        let remaining = guard.block_count - guard.direct_refs.len();
        let mut to_free = Vec::with_capacity(remaining);
        {
            let bytes = pool.read(&*guard, indirect_block)?;
            for i in 0..remaining {
                let pos = i * BLOCK_INDEX_BYTES;
                to_free.push(decode_index(&bytes[pos..pos + BLOCK_INDEX_BYTES]));
            }
        }
        for block in to_free {
            pool.free(block)?;
        }
        pool.free(indirect_block)?;
    }

    guard.size = 0;
    guard.block_count = 0;
    log::trace!("inode_clear: {} released", guard.inumber());
    Ok(())
}

/// Allocates the directory's sole data block and formats it with
/// `max_dir_entries` empty (sentinel) entries. Only ever called from
/// [`super::table::InodeTable::allocate_locked`] while the slot is freshly
/// taken and not yet reachable by any other thread.
pub(crate) fn init_directory(
    guard: &mut InodeWriteGuard<'_>,
    pool: &BlockPool,
    config: &FsConfig,
) -> FsResult<()> {
    let block = extend(guard, pool, config)?;
    let bytes = pool.write(guard, block)?;
    super::directory::format_empty_block(bytes, config);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inode::InodeType;
    use crate::inode::table::InodeTable;

    fn small_config() -> FsConfig {
        FsConfig {
            block_size: 16,
            data_blocks: 32,
            inode_table_size: 4,
            inode_direct_refs: 2,
            max_file_name: 8,
            ..FsConfig::DEFAULT
        }
    }

    #[test]
    fn extend_spills_into_indirection_block() {
        let config = small_config();
        let pool = BlockPool::new(config);
        let table = InodeTable::new(config);
        let file = table.create(InodeType::File, &pool).unwrap();
        let mut guard = table.lock_write(file).unwrap();

        let max_indirect = config.max_indirect_refs();
        let total = config.inode_direct_refs + max_indirect;
        let mut blocks = Vec::new();
        for _ in 0..total {
            blocks.push(extend(&mut guard, &pool, &config).unwrap());
        }
        assert_eq!(guard.block_count, total);
        assert!(extend(&mut guard, &pool, &config).is_err());

        for (i, expected) in blocks.iter().enumerate() {
            assert_eq!(get_block(&guard, &pool, &config, i).unwrap(), *expected);
        }
    }

    #[test]
    fn clear_releases_direct_and_indirect_blocks() {
        let config = small_config();
        let pool = BlockPool::new(config);
        let table = InodeTable::new(config);
        let file = table.create(InodeType::File, &pool).unwrap();
        {
            let mut guard = table.lock_write(file).unwrap();
            for _ in 0..(config.inode_direct_refs + 3) {
                extend(&mut guard, &pool, &config).unwrap();
            }
        }
        table.clear(file, &pool).unwrap();
        // every block must be free again: allocate the whole pool back out.
        let mut reclaimed = 0;
        while pool.alloc().is_ok() {
            reclaimed += 1;
        }
        assert_eq!(reclaimed, config.data_blocks);
    }
}
