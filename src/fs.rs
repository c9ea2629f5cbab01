//! The filesystem facade: owns the block pool, the i-node table, and the
//! open-file table, and wires them together behind the path-based
//! operations of the public API.

use std::io::Write as _;

use bitflags::bitflags;

use crate::block::BlockPool;
use crate::config::FsConfig;
use crate::error::{CopyOutErrorKind, FsError, FsResult};
use crate::ids::{FileHandle, Inumber};
use crate::inode::{InodeTable, InodeType, directory};
use crate::open_file::OpenFileTable;

bitflags! {
    /// Flags accepted by [`Fs::open`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpenFlags: u8 {
        /// Create the file if it does not already exist.
        const CREAT = 0b001;
        /// Discard existing content after resolving the path.
        const TRUNC = 0b010;
        /// Snap the offset to the current end of file before every transfer.
        const APPEND = 0b100;
    }
}

/// An in-memory, single-volume filesystem instance.
///
/// There is no process-wide singleton: every operation is a method on `&Fs`,
/// and teardown ([`Fs::destroy`], [`Fs::destroy_after_all_closed`]) consumes
/// `self` so a destroyed instance cannot be used again.
pub struct Fs {
    config: FsConfig,
    pool: BlockPool,
    inodes: InodeTable,
    open_files: OpenFileTable,
}

/// Strips the leading `/` from `path` and validates the remainder as a flat
/// name. Only root-level names are addressable.
fn validate_path<'a>(path: &'a str, config: &FsConfig) -> FsResult<&'a str> {
    let name = path.strip_prefix('/').ok_or(FsError::InvalidPath)?;
    if name.is_empty() || name.contains('/') {
        return Err(FsError::InvalidPath);
    }
    if name.len() > config.max_file_name {
        return Err(FsError::NameTooLong);
    }
    Ok(name)
}

impl Fs {
    /// Builds a filesystem with the given configuration. Infallible: the
    /// root directory is created as i-node 0 before the constructor returns.
    #[must_use]
    pub fn new(config: FsConfig) -> Self {
        let pool = BlockPool::new(config);
        let inodes = InodeTable::new(config);
        let root = inodes
            .create(InodeType::Directory, &pool)
            .expect("a freshly built inode table always has room for the root directory");
        debug_assert_eq!(root, Inumber::ROOT);
        log::debug!(
            "fs_init: volume ready, block_size={}, data_blocks={}",
            config.block_size,
            config.data_blocks
        );
        Self {
            config,
            pool,
            inodes,
            open_files: OpenFileTable::new(config),
        }
    }

    /// Builds a filesystem using [`FsConfig::DEFAULT`].
    #[must_use]
    pub fn with_default_config() -> Self {
        Self::new(FsConfig::DEFAULT)
    }

    #[must_use]
    pub fn config(&self) -> &FsConfig {
        &self.config
    }

    /// Resolves `path` to its i-node number.
    pub fn lookup(&self, path: &str) -> FsResult<Inumber> {
        let name = validate_path(path, &self.config)?;
        let root = self.inodes.lock_read(Inumber::ROOT)?;
        directory::find_in_dir(&root, &self.pool, &self.config, name)
    }

    /// Resolves `path`, optionally creating and/or truncating it, and
    /// returns a fresh handle onto it.
    pub fn open(&self, path: &str, flags: OpenFlags) -> FsResult<FileHandle> {
        let name = validate_path(path, &self.config)?;
        let inumber = if flags.contains(OpenFlags::CREAT) {
            let (inumber, _created) = directory::lookup_or_create(
                &self.inodes,
                Inumber::ROOT,
                &self.pool,
                &self.config,
                name,
                InodeType::File,
            )?;
            inumber
        } else {
            let root = self.inodes.lock_read(Inumber::ROOT)?;
            directory::find_in_dir(&root, &self.pool, &self.config, name)?
        };

        if flags.contains(OpenFlags::TRUNC) {
            self.inodes.clear(inumber, &self.pool)?;
        }

        let handle = self
            .open_files
            .add(inumber, flags.contains(OpenFlags::APPEND))?;
        log::trace!("fs_open: {path} -> {handle} ({inumber})");
        Ok(handle)
    }

    /// Releases a handle. Wakes a pending [`Fs::destroy_after_all_closed`]
    /// if this was the last one open.
    pub fn close(&self, handle: FileHandle) -> FsResult<()> {
        self.open_files.remove(handle)
    }

    /// Reads up to `buf.len()` bytes at the handle's current offset,
    /// advancing it by the number of bytes actually read.
    pub fn read(&self, handle: FileHandle, buf: &mut [u8]) -> FsResult<usize> {
        self.open_files.read(handle, &self.inodes, &self.pool, buf)
    }

    /// Writes up to `data.len()` bytes at the handle's current offset,
    /// extending the file as needed and advancing the offset.
    pub fn write(&self, handle: FileHandle, data: &[u8]) -> FsResult<usize> {
        self.open_files
            .write(handle, &self.inodes, &self.pool, data)
    }

    /// Copies the whole content of `src_path` into a fresh host file at
    /// `dst_host_path`, without holding any internal lock across the host
    /// I/O.
    pub fn copy_to_external(
        &self,
        src_path: &str,
        dst_host_path: &std::path::Path,
    ) -> FsResult<()> {
        let handle = self.open(src_path, OpenFlags::empty()).map_err(|err| {
            log::warn!("copy_to_external: failed to open {src_path}: {err}");
            FsError::CopyOut(CopyOutErrorKind::SourceOpenFailed)
        })?;
        let result = self.copy_to_external_inner(handle, dst_host_path);
        let _ = self.close(handle);
        result
    }

    fn copy_to_external_inner(
        &self,
        handle: FileHandle,
        dst_host_path: &std::path::Path,
    ) -> FsResult<()> {
        let mut dst = std::fs::File::create(dst_host_path).map_err(|err| {
            log::warn!(
                "copy_to_external: failed to create {}: {err}",
                dst_host_path.display()
            );
            FsError::CopyOut(CopyOutErrorKind::DestinationCreateFailed)
        })?;

        let mut buf = vec![0u8; self.config.block_size.max(1)];
        loop {
            let n = self.read(handle, &mut buf)?;
            if n == 0 {
                break;
            }
            dst.write_all(&buf[..n]).map_err(|err| {
                log::warn!("copy_to_external: write failed: {err}");
                FsError::CopyOut(CopyOutErrorKind::Write)
            })?;
        }
        dst.flush().map_err(|err| {
            log::warn!("copy_to_external: flush failed: {err}");
            FsError::CopyOut(CopyOutErrorKind::Flush)
        })
    }

    /// Tears the filesystem down immediately, regardless of open handles.
    pub fn destroy(self) -> FsResult<()> {
        log::debug!("fs_destroy: tearing down volume");
        Ok(())
    }

    /// Blocks until every handle has been closed, then tears the filesystem
    /// down.
    pub fn destroy_after_all_closed(self) -> FsResult<()> {
        log::debug!("fs_destroy_after_all_closed: waiting for quiescence");
        self.open_files.wait_until_quiescent();
        self.destroy()
    }
}

/// A thin adapter over [`Fs`] reproducing the exact `-1`-sentinel function
/// signatures of the original external interface, for callers that want the
/// historical contract verbatim.
pub mod posix {
    use super::{Fs, OpenFlags};

    const FAIL: i32 = -1;

    #[must_use]
    pub fn tfs_init() -> Fs {
        Fs::with_default_config()
    }

    pub fn tfs_destroy(fs: Fs) -> i32 {
        fs.destroy().map_or(FAIL, |()| 0)
    }

    pub fn tfs_destroy_after_all_closed(fs: Fs) -> i32 {
        fs.destroy_after_all_closed().map_or(FAIL, |()| 0)
    }

    pub fn tfs_lookup(fs: &Fs, path: &str) -> i32 {
        fs.lookup(path)
            .map_or(FAIL, |inumber| i32::try_from(inumber.get()).unwrap_or(FAIL))
    }

    pub fn tfs_open(fs: &Fs, path: &str, flags: OpenFlags) -> i32 {
        fs.open(path, flags)
            .map_or(FAIL, |handle| i32::try_from(handle.get()).unwrap_or(FAIL))
    }

    pub fn tfs_close(fs: &Fs, fhandle: u32) -> i32 {
        fs.close(crate::ids::FileHandle::new(fhandle))
            .map_or(FAIL, |()| 0)
    }

    pub fn tfs_read(fs: &Fs, fhandle: u32, buf: &mut [u8]) -> isize {
        fs.read(crate::ids::FileHandle::new(fhandle), buf)
            .map_or(-1, |n| isize::try_from(n).unwrap_or(-1))
    }

    pub fn tfs_write(fs: &Fs, fhandle: u32, data: &[u8]) -> isize {
        fs.write(crate::ids::FileHandle::new(fhandle), data)
            .map_or(-1, |n| isize::try_from(n).unwrap_or(-1))
    }

    pub fn tfs_copy_to_external_fs(
        fs: &Fs,
        src_path: &str,
        dst_host_path: &std::path::Path,
    ) -> i32 {
        fs.copy_to_external(src_path, dst_host_path)
            .map_or(FAIL, |()| 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_fs() -> Fs {
        Fs::new(FsConfig {
            block_size: 32,
            data_blocks: 64,
            inode_table_size: 8,
            max_open_files: 8,
            inode_direct_refs: 2,
            max_file_name: 16,
            ..FsConfig::DEFAULT
        })
    }

    #[test]
    fn round_trip() {
        let fs = small_fs();
        let handle = fs.open("/file", OpenFlags::CREAT).unwrap();
        assert_eq!(fs.write(handle, b"abcdefghij").unwrap(), 10);
        fs.close(handle).unwrap();

        let handle = fs.open("/file", OpenFlags::empty()).unwrap();
        let mut buf = [0u8; 10];
        assert_eq!(fs.read(handle, &mut buf).unwrap(), 10);
        assert_eq!(&buf, b"abcdefghij");
        let mut empty = [0u8; 1];
        assert_eq!(fs.read(handle, &mut empty).unwrap(), 0);
        fs.close(handle).unwrap();
    }

    #[test]
    fn open_creat_twice_yields_same_inode() {
        let fs = small_fs();
        let a = fs.open("/x", OpenFlags::CREAT).unwrap();
        let b = fs.open("/x", OpenFlags::CREAT).unwrap();
        assert_ne!(a, b);
        fs.close(a).unwrap();
        fs.close(b).unwrap();
    }

    #[test]
    fn truncate_invalidates_a_pending_read_on_another_handle() {
        let fs = small_fs();
        let a = fs.open("/file", OpenFlags::CREAT).unwrap();
        fs.write(a, b"x").unwrap();
        let b = fs.open("/file", OpenFlags::TRUNC).unwrap();
        let mut buf = [0u8; 1];
        assert_eq!(fs.read(a, &mut buf), Err(FsError::OffsetBeyondEnd));
        fs.close(a).unwrap();
        fs.close(b).unwrap();
    }

    #[test]
    fn invalid_paths_are_rejected() {
        let fs = small_fs();
        assert_eq!(
            fs.open("no-leading-slash", OpenFlags::CREAT),
            Err(FsError::InvalidPath)
        );
        assert_eq!(fs.open("/", OpenFlags::CREAT), Err(FsError::InvalidPath));
        assert_eq!(fs.open("/a/b", OpenFlags::CREAT), Err(FsError::InvalidPath));
    }

    #[test]
    fn lookup_of_missing_file_fails() {
        let fs = small_fs();
        assert_eq!(fs.lookup("/missing"), Err(FsError::NotFound));
    }

    #[test]
    fn copy_to_external_writes_full_content() {
        let fs = small_fs();
        let handle = fs.open("/file", OpenFlags::CREAT).unwrap();
        fs.write(handle, b"abcdefghij").unwrap();
        fs.close(handle).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let dst = dir.path().join("out");
        fs.copy_to_external("/file", &dst).unwrap();
        assert_eq!(std::fs::read(&dst).unwrap(), b"abcdefghij");
    }

    #[test]
    fn copy_to_external_of_missing_file_fails() {
        let fs = small_fs();
        let dir = tempfile::tempdir().unwrap();
        let dst = dir.path().join("out");
        assert_eq!(
            fs.copy_to_external("/missing", &dst),
            Err(FsError::CopyOut(CopyOutErrorKind::SourceOpenFailed))
        );
    }
}
