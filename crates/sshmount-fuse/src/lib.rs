//! FUSE filesystem over SFTP.
//!
//! This crate is the bridge between kernel VFS upcalls and a remote SFTP
//! tree: an inode table keyed by parent and name, a one-shot directory
//! stream per listing, opaque file handles wrapping remote files, and a
//! single errno mapping rule for every remote failure.
//!
//! All work happens synchronously on the upcall thread. The core owns no
//! timers, no worker pools and no transport state; everything remote goes
//! through the [`SftpClient`](sshmount_sftp::SftpClient) capability.
//!
//! # Usage
//!
//! ```ignore
//! use sshmount_fuse::{MountConfig, SshfsMount};
//!
//! let client = sshmount_sftp::connect(&opts)?;
//! let handle = SshfsMount::new().mount(
//!     Arc::new(client),
//!     "/srv/data",
//!     "/mnt/remote",
//!     MountConfig::default(),
//!     &[],
//! )?;
//! handle.unmount()?;
//! ```

pub mod config;
pub mod dirstream;
pub mod error;
pub mod filesystem;
pub mod handles;
pub mod inode;
pub mod mount;
pub mod stats;

pub use config::MountConfig;
pub use dirstream::{DirStream, DirStreamEntry};
pub use error::{FsError, FsResult};
pub use filesystem::SshFs;
pub use handles::{HandleTable, OpenHandle};
pub use inode::{InodeEntry, InodeTable, NodeKind, ROOT_INODE};
pub use mount::{MountError, SshfsMount, SshfsMountHandle};
pub use stats::{MountStats, StatsSnapshot};
