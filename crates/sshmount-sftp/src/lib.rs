//! SFTP client capability for sshmount.
//!
//! This crate defines the narrow, synchronous contract the filesystem core
//! consumes ([`SftpClient`] / [`RemoteFile`]) and provides the production
//! implementation backed by `ssh2` (libssh2), plus the session establishment
//! helpers the CLI uses to produce a ready client.
//!
//! The core owns no transport state: everything protocol-related lives
//! behind these traits, which also gives tests an in-memory seam
//! ([`testing::MemoryClient`]).

pub mod client;
pub mod connect;
pub mod error;
pub mod ssh2_client;
pub mod testing;

pub use client::{FileStat, RemoteDirEntry, RemoteFile, SftpClient};
pub use connect::{ConnectOptions, connect};
pub use error::{SftpError, SftpResult};
pub use ssh2_client::Ssh2Client;
