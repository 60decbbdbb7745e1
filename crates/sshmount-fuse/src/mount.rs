//! Mount orchestration.
//!
//! [`SshfsMount`] constructs the filesystem with its root node, assembles
//! mount options per host OS, registers with the kernel transport and
//! waits for the mount to become live. The returned
//! [`SshfsMountHandle`] controls the session's lifecycle: unmount on
//! request, unmount on drop.

use crate::config::MountConfig;
use crate::filesystem::SshFs;
use crate::stats::MountStats;
use fuser::{BackgroundSession, MountOption};
use sshmount_sftp::SftpClient;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors from mounting or unmounting.
#[derive(Debug, Error)]
pub enum MountError {
    /// FUSE is not usable on this host.
    #[error("fuse unavailable: {0}")]
    Unavailable(String),

    /// The kernel refused the mount.
    #[error("mount failed: {0}")]
    Mount(#[from] std::io::Error),

    /// The mount was spawned but never became live.
    #[error("mount did not become ready within {0:?}")]
    NotReady(Duration),
}

/// Handle to a mounted filesystem. Dropping it unmounts.
pub struct SshfsMountHandle {
    session: Option<BackgroundSession>,
    mountpoint: PathBuf,
    stats: Arc<MountStats>,
}

impl SshfsMountHandle {
    pub fn mountpoint(&self) -> &Path {
        &self.mountpoint
    }

    /// Statistics recorded by the filesystem since mount.
    pub fn stats(&self) -> Arc<MountStats> {
        Arc::clone(&self.stats)
    }

    /// Tears the session down and waits for the kernel to let go.
    pub fn unmount(mut self) {
        if let Some(session) = self.session.take() {
            info!(mountpoint = %self.mountpoint.display(), "unmounting");
            session.join();
            info!(mountpoint = %self.mountpoint.display(), "unmounted");
        }
    }
}

impl Drop for SshfsMountHandle {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            debug!(mountpoint = %self.mountpoint.display(), "unmounting on drop");
            session.join();
        }
    }
}

/// The mount orchestrator.
#[derive(Debug, Clone, Copy)]
pub struct SshfsMount {
    /// How long to wait for the mount to become live.
    pub mount_timeout: Duration,
    /// Polling interval while waiting.
    pub poll_interval: Duration,
}

impl Default for SshfsMount {
    fn default() -> Self {
        Self::new()
    }
}

impl SshfsMount {
    pub fn new() -> Self {
        Self {
            mount_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_millis(50),
        }
    }

    /// Whether the host can serve FUSE mounts at all.
    pub fn is_available() -> bool {
        #[cfg(target_os = "macos")]
        {
            Path::new("/Library/Filesystems/macfuse.fs").exists()
        }
        #[cfg(target_os = "linux")]
        {
            Path::new("/dev/fuse").exists()
        }
        #[cfg(not(any(target_os = "macos", target_os = "linux")))]
        {
            false
        }
    }

    /// Assembles the final option list: the caller's extras, then
    /// read-write, then the platform's volume/name options.
    fn assemble_options(config: &MountConfig, extra: &[MountOption]) -> Vec<MountOption> {
        let mut options = extra.to_vec();
        options.push(MountOption::RW);
        if cfg!(target_os = "macos") {
            options.push(MountOption::CUSTOM(format!(
                "volname={}",
                config.display_name
            )));
        } else if cfg!(target_os = "linux") {
            options.push(MountOption::FSName("ssh".to_string()));
            options.push(MountOption::Subtype(config.display_name.clone()));
        } else {
            warn!("no platform mount options for this OS");
        }
        options
    }

    /// Mounts the remote tree at `mountpoint` and returns once the mount
    /// is live.
    pub fn mount(
        &self,
        sftp: Arc<dyn SftpClient>,
        remote_root: impl Into<PathBuf>,
        mountpoint: impl AsRef<Path>,
        config: MountConfig,
        extra_options: &[MountOption],
    ) -> Result<SshfsMountHandle, MountError> {
        if !Self::is_available() {
            return Err(MountError::Unavailable(
                "FUSE is not installed or the kernel module is missing".to_string(),
            ));
        }
        let mountpoint = mountpoint.as_ref();
        let remote_root = remote_root.into();
        info!(
            remote_root = %remote_root.display(),
            mountpoint = %mountpoint.display(),
            "mounting"
        );

        let options = Self::assemble_options(&config, extra_options);
        let fs = SshFs::new(sftp, remote_root, config);
        let stats = fs.stats();

        let session = fuser::spawn_mount2(fs, mountpoint, &options)?;
        self.wait_for_mount(mountpoint)?;

        info!(mountpoint = %mountpoint.display(), "mount ready");
        Ok(SshfsMountHandle {
            session: Some(session),
            mountpoint: mountpoint.to_path_buf(),
            stats,
        })
    }

    /// Polls until the mountpoint's device id differs from its parent's,
    /// which is the reliable signal that the kernel grafted the mount.
    fn wait_for_mount(&self, mountpoint: &Path) -> Result<(), MountError> {
        #[cfg(unix)]
        use std::os::unix::fs::MetadataExt;

        let deadline = Instant::now() + self.mount_timeout;
        let parent = mountpoint.parent().unwrap_or(Path::new("/"));

        while Instant::now() < deadline {
            #[cfg(unix)]
            if let (Ok(meta), Ok(parent_meta)) =
                (std::fs::metadata(mountpoint), std::fs::metadata(parent))
                && meta.dev() != parent_meta.dev()
            {
                debug!(mountpoint = %mountpoint.display(), "mount is live");
                return Ok(());
            }

            #[cfg(not(unix))]
            if mountpoint.is_dir() {
                return Ok(());
            }

            std::thread::sleep(self.poll_interval);
        }
        Err(MountError::NotReady(self.mount_timeout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn availability_check_does_not_panic() {
        let _ = SshfsMount::is_available();
    }

    #[test]
    fn options_always_include_rw() {
        let config = MountConfig::default().display_name("data");
        let options = SshfsMount::assemble_options(&config, &[]);
        assert!(options.contains(&MountOption::RW));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn linux_options_carry_fsname_and_label() {
        let config = MountConfig::default().display_name("data");
        let options = SshfsMount::assemble_options(&config, &[]);
        assert!(options.contains(&MountOption::FSName("ssh".to_string())));
        assert!(options.contains(&MountOption::Subtype("data".to_string())));
    }

    #[cfg(target_os = "macos")]
    #[test]
    fn macos_options_carry_volname() {
        let config = MountConfig::default().display_name("data");
        let options = SshfsMount::assemble_options(&config, &[]);
        assert!(options.contains(&MountOption::CUSTOM("volname=data".to_string())));
    }

    #[test]
    fn caller_options_come_first() {
        let config = MountConfig::default();
        let extra = vec![MountOption::AutoUnmount];
        let options = SshfsMount::assemble_options(&config, &extra);
        assert_eq!(options[0], MountOption::AutoUnmount);
    }
}
