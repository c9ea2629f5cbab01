//! Error hierarchy for the filesystem engine.
//!
//! Every fallible internal operation returns [`FsError`]; the `posix` adapter
//! (see [`crate::fs::posix`]) collapses all of them to `-1`, matching the
//! original external contract.

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FsError {
    #[error("path must start with '/' and name at least one byte")]
    InvalidPath,
    #[error("name is empty")]
    EmptyName,
    #[error("name exceeds the maximum file name length")]
    NameTooLong,
    #[error("no such file or directory")]
    NotFound,
    #[error("inode is not a directory")]
    NotADirectory,
    #[error("invalid i-node number")]
    InvalidInumber,
    #[error("invalid file handle")]
    InvalidHandle,
    #[error("no free data blocks")]
    NoFreeBlocks,
    #[error("no free i-nodes")]
    NoFreeInodes,
    #[error("no free open-file entries")]
    NoFreeHandles,
    #[error("directory is full")]
    DirectoryFull,
    #[error("file would exceed the maximum file size")]
    FileTooLarge,
    #[error("offset is beyond the end of the file")]
    OffsetBeyondEnd,
    #[error("i/o error copying to the host filesystem: {0}")]
    CopyOut(CopyOutErrorKind),
}

/// A lossless, `Eq`-able summary of the `std::io::Error` that aborted a
/// [`crate::fs::Fs::copy_to_external`] call; the original error is logged but
/// not retained, since the public contract (§7) exposes only a pass/fail
/// signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyOutErrorKind {
    SourceOpenFailed,
    DestinationCreateFailed,
    Write,
    Flush,
}

impl std::fmt::Display for CopyOutErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msg = match self {
            Self::SourceOpenFailed => "failed to open source file",
            Self::DestinationCreateFailed => "failed to create destination host file",
            Self::Write => "failed to write to destination host file",
            Self::Flush => "failed to flush destination host file",
        };
        f.write_str(msg)
    }
}

pub type FsResult<T> = Result<T, FsError>;
