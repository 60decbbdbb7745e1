//! Error handling and errno mapping.
//!
//! Every remote failure is translated into a kernel errno by one rule:
//! keep the kind when it is recognizable, otherwise report EIO. The
//! not-found distinction must survive Lookup so the kernel can cache
//! negative entries.

use libc::c_int;
use sshmount_sftp::SftpError;
use thiserror::Error;

/// Filesystem-level errors surfaced to the kernel.
#[derive(Debug, Error)]
pub enum FsError {
    /// Remote operation failed.
    #[error(transparent)]
    Sftp(#[from] SftpError),

    /// The kernel presented an inode the table does not know.
    #[error("invalid inode: {0}")]
    InvalidInode(u64),

    /// Operation requires a directory.
    #[error("not a directory: inode {0}")]
    NotADirectory(u64),

    /// Operation requires a regular file.
    #[error("is a directory: inode {0}")]
    IsDirectory(u64),

    /// A child with this name already exists locally.
    #[error("name is busy: {0}")]
    Busy(String),
}

impl FsError {
    /// The single errno mapping rule.
    pub fn to_errno(&self) -> c_int {
        match self {
            FsError::Sftp(e) => sftp_error_to_errno(e),
            FsError::InvalidInode(_) => libc::ENOENT,
            FsError::NotADirectory(_) => libc::ENOTDIR,
            FsError::IsDirectory(_) => libc::EISDIR,
            FsError::Busy(_) => libc::EBUSY,
        }
    }
}

/// Maps a remote failure to an errno, preserving recognizable kinds.
pub fn sftp_error_to_errno(err: &SftpError) -> c_int {
    match err {
        SftpError::NotFound => libc::ENOENT,
        SftpError::PermissionDenied => libc::EACCES,
        SftpError::AlreadyExists => libc::EEXIST,
        SftpError::IsDirectory => libc::EISDIR,
        SftpError::NotADirectory => libc::ENOTDIR,
        SftpError::NotEmpty => libc::ENOTEMPTY,
        SftpError::Io(e) => e.raw_os_error().unwrap_or(libc::EIO),
        SftpError::Auth(_)
        | SftpError::Protocol { .. }
        | SftpError::Transport(_) => libc::EIO,
    }
}

/// Result type for filesystem operations.
pub type FsResult<T> = Result<T, FsError>;
