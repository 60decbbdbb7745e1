//! Error taxonomy for SFTP operations.
//!
//! Every failure the adapter can produce is collapsed into [`SftpError`],
//! preserving the kinds the filesystem layer must be able to recognize
//! (most importantly not-found, which drives negative dentry caching).
//! Anything unrecognized degrades to [`SftpError::Protocol`] and is
//! reported upward as a plain I/O error.

use std::io;
use thiserror::Error;

// SFTP status codes from the protocol (LIBSSH2_FX_*).
const FX_NO_SUCH_FILE: i32 = 2;
const FX_PERMISSION_DENIED: i32 = 3;
const FX_NO_SUCH_PATH: i32 = 10;
const FX_FILE_ALREADY_EXISTS: i32 = 11;
const FX_DIR_NOT_EMPTY: i32 = 18;
const FX_NOT_A_DIRECTORY: i32 = 19;

/// Errors surfaced by the SFTP adapter.
#[derive(Debug, Error)]
pub enum SftpError {
    /// The remote path does not exist.
    #[error("no such file or directory")]
    NotFound,

    /// The server refused the operation.
    #[error("permission denied")]
    PermissionDenied,

    /// The remote path already exists.
    #[error("file already exists")]
    AlreadyExists,

    /// The operation targets a directory but expected a file.
    #[error("is a directory")]
    IsDirectory,

    /// The operation targets a file but expected a directory.
    #[error("not a directory")]
    NotADirectory,

    /// Directory removal on a non-empty directory.
    #[error("directory not empty")]
    NotEmpty,

    /// Authentication failed while establishing the session.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Any other SFTP status the server returned.
    #[error("sftp status {code}: {message}")]
    Protocol { code: i32, message: String },

    /// SSH transport failure (handshake, channel, socket).
    #[error("ssh transport error: {0}")]
    Transport(String),

    /// Local I/O failure (TCP connect, identity file access).
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl SftpError {
    /// Whether this error means the remote path does not exist.
    ///
    /// Lookup relies on this distinction to let the kernel cache
    /// negative entries.
    pub fn is_not_found(&self) -> bool {
        matches!(self, SftpError::NotFound)
    }

    /// Classifies an `ssh2` error by its SFTP status code, falling back to
    /// a transport error for session-level failures.
    pub fn from_ssh2(err: &ssh2::Error) -> Self {
        match err.code() {
            ssh2::ErrorCode::SFTP(code) => Self::from_status(code, err.message()),
            ssh2::ErrorCode::Session(_) => SftpError::Transport(err.message().to_string()),
        }
    }

    /// Maps a raw SFTP status code to an error kind.
    pub fn from_status(code: i32, message: &str) -> Self {
        match code {
            FX_NO_SUCH_FILE | FX_NO_SUCH_PATH => SftpError::NotFound,
            FX_PERMISSION_DENIED => SftpError::PermissionDenied,
            FX_FILE_ALREADY_EXISTS => SftpError::AlreadyExists,
            FX_DIR_NOT_EMPTY => SftpError::NotEmpty,
            FX_NOT_A_DIRECTORY => SftpError::NotADirectory,
            _ => SftpError::Protocol {
                code,
                message: message.to_string(),
            },
        }
    }
}

impl From<ssh2::Error> for SftpError {
    fn from(err: ssh2::Error) -> Self {
        SftpError::from_ssh2(&err)
    }
}

/// Result alias for adapter operations.
pub type SftpResult<T> = Result<T, SftpError>;
