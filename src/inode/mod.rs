//! The i-node table: a fixed array of i-node records plus a free bitmap,
//! guarded by a table-level lock for allocation/deletion and a per-slot
//! reader-writer lock for content changes.
//!
//! Submodules mirror the spec's component breakdown: [`table`] owns
//! allocation and the lock-order discipline, [`content`] owns the extent
//! indirection machinery (`extend`/`get_block`/`clear`), and [`directory`]
//! layers directory semantics on top of a directory-typed i-node.

pub mod content;
pub mod directory;
pub mod table;

pub use table::InodeTable;

/// The type tag stored in an i-node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum InodeType {
    #[strum(serialize = "file")]
    File,
    #[strum(serialize = "directory")]
    Directory,
}

impl InodeType {
    #[must_use]
    pub const fn is_directory(self) -> bool {
        matches!(self, Self::Directory)
    }
}

/// In-memory record for one i-node slot.
///
/// `in_use` lives alongside the content fields, guarded by the same
/// reader-writer lock, so `inode_clear`/`inode_delete` can tell a free slot
/// from an allocated one while holding only the slot lock — the original's
/// `free_inode_ts` lookup inside `inode_clear_unsafe` reads that array
/// without the table lock, which is a benign data race in C but would not be
/// `Sync` in Rust without this change (see DESIGN.md).
#[derive(Debug, Clone)]
pub(crate) struct InodeSlot {
    pub in_use: bool,
    pub ty: InodeType,
    pub size: usize,
    pub block_count: usize,
    pub direct_refs: Vec<Option<crate::ids::BlockIndex>>,
    pub indirect_block: Option<crate::ids::BlockIndex>,
}

impl InodeSlot {
    pub(crate) fn empty(direct_refs_len: usize) -> Self {
        Self {
            in_use: false,
            ty: InodeType::File,
            size: 0,
            block_count: 0,
            direct_refs: vec![None; direct_refs_len],
            indirect_block: None,
        }
    }
}
