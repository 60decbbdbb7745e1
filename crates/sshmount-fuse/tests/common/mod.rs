//! Shared harness for filesystem integration tests.
//!
//! These tests drive the operation layer of [`SshFs`] directly against an
//! in-memory remote; no kernel mount and no SSH server are involved. The
//! seam is the `SftpClient` trait.

// Not all tests use every helper.
#![allow(dead_code)]

use sshmount_fuse::{MountConfig, SshFs, ROOT_INODE};
use sshmount_sftp::SftpClient;
use sshmount_sftp::testing::MemoryClient;
use std::sync::Arc;

/// The remote directory the filesystem is anchored at.
pub const REMOTE_ROOT: &str = "/srv/data";

/// A filesystem wired to an in-memory remote.
pub struct TestFs {
    pub client: Arc<MemoryClient>,
    pub fs: SshFs,
}

impl TestFs {
    /// An empty remote tree with only the root directory.
    pub fn new() -> Self {
        let client = Arc::new(MemoryClient::new());
        client.add_dir("/srv");
        client.add_dir(REMOTE_ROOT);
        client.clear_calls();
        let fs = SshFs::new(
            Arc::clone(&client) as Arc<dyn SftpClient>,
            REMOTE_ROOT,
            MountConfig::default(),
        );
        Self { client, fs }
    }

    /// Absolute remote path for a path relative to the mount root.
    pub fn remote(&self, rel: &str) -> String {
        if rel.is_empty() {
            REMOTE_ROOT.to_string()
        } else {
            format!("{REMOTE_ROOT}/{rel}")
        }
    }

    /// Seeds a file under the mount root.
    pub fn seed_file(&self, rel: &str, data: &[u8]) {
        self.client.add_file(self.remote(rel), data);
    }

    /// Seeds a directory under the mount root.
    pub fn seed_dir(&self, rel: &str) {
        self.client.add_dir(self.remote(rel));
    }

    /// Looks up a direct child of the mount root, returning its inode.
    pub fn lookup_root(&self, name: &str) -> u64 {
        self.fs
            .lookup_child(ROOT_INODE, name)
            .unwrap_or_else(|e| panic!("lookup {name} failed: {e}"))
            .0
    }

    /// Drains a directory stream into its entry names.
    pub fn list_names(&self, ino: u64) -> Vec<String> {
        let mut stream = self.fs.list_dir(ino).expect("list_dir failed");
        let mut names = Vec::new();
        while stream.has_next() {
            names.push(stream.next().unwrap().name);
        }
        names
    }
}

impl Default for TestFs {
    fn default() -> Self {
        Self::new()
    }
}
