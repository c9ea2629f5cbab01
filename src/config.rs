//! Compile-time parameters of the original design, modeled as a runtime value
//! so tests can shrink the tables instead of recompiling.
//!
//! Mirrors the way kernel tuning constants (`NINODE`, `NFILE`, ...) are
//! collected in one small module upstream, generalized from `pub const` to a
//! struct so more than one configuration can exist in a process at once.

/// Bytes used to encode a block index inside an indirection block.
const BLOCK_INDEX_BYTES: usize = 4;
/// Bytes used to encode an i-node number inside a directory entry.
const DIR_ENTRY_INUMBER_BYTES: usize = 4;

/// Every size/shape parameter of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FsConfig {
    /// Size in bytes of a single block.
    pub block_size: usize,
    /// Number of blocks in the block pool.
    pub data_blocks: usize,
    /// Number of slots in the i-node table.
    pub inode_table_size: usize,
    /// Number of slots in the open-file table.
    pub max_open_files: usize,
    /// Number of direct block references stored inline in an i-node.
    pub inode_direct_refs: usize,
    /// Maximum length of a file name, including the terminating NUL.
    pub max_file_name: usize,
    /// Number of busy-wait iterations per simulated storage access.
    pub delay: u32,
}

impl FsConfig {
    /// A configuration comparable in scale to the original source's
    /// defaults, generous enough to run the end-to-end scenarios of the
    /// specification without tuning.
    pub const DEFAULT: Self = Self {
        block_size: 1024,
        data_blocks: 4096,
        inode_table_size: 64,
        max_open_files: 128,
        inode_direct_refs: 10,
        max_file_name: 40,
        delay: 0,
    };

    /// Number of `u32` block references that fit in one indirection block.
    #[must_use]
    pub const fn max_indirect_refs(&self) -> usize {
        self.block_size / BLOCK_INDEX_BYTES
    }

    /// Largest file size the extent layout (direct refs + one indirection
    /// block) can address.
    #[must_use]
    pub const fn max_file_size(&self) -> usize {
        self.block_size * (self.inode_direct_refs + self.max_indirect_refs())
    }

    /// Serialized size of one directory entry: the name buffer plus the
    /// i-node number.
    #[must_use]
    pub const fn dir_entry_size(&self) -> usize {
        self.max_file_name + DIR_ENTRY_INUMBER_BYTES
    }

    /// Number of directory entries that fit in one block.
    #[must_use]
    pub const fn max_dir_entries(&self) -> usize {
        self.block_size / self.dir_entry_size()
    }
}

impl Default for FsConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}
