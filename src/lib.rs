//! An in-memory, single-volume filesystem engine built around an i-node
//! table, a block pool, and an open-file table, each with its own locking
//! tier.
//!
//! [`Fs`] is the entry point: construct one with [`Fs::new`] or
//! [`Fs::with_default_config`], then drive it through `lookup`/`open`/
//! `close`/`read`/`write`/`copy_to_external`. The [`fs::posix`] submodule
//! reproduces the original `-1`-sentinel call signatures for callers that
//! want that contract verbatim.
//!
//! Lock order is fixed across the whole engine: inode-table lock →
//! inode-slot lock → block-pool lock, and handle lock → inode-slot lock →
//! block-pool lock. No code path may acquire them in any other order.

mod block;
mod config;
mod delay;
mod error;
mod fs;
mod ids;
mod inode;
mod open_file;

pub use config::FsConfig;
pub use error::{CopyOutErrorKind, FsError, FsResult};
pub use fs::{Fs, OpenFlags, posix};
pub use ids::{BlockIndex, FileHandle, Inumber};
pub use inode::InodeType;
