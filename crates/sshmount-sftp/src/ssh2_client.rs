//! Production [`SftpClient`] backed by `ssh2` (libssh2).
//!
//! All SFTP traffic for one session is multiplexed over a single channel,
//! so every operation takes a session-wide protocol lock. The lock covers
//! whole operations (e.g. the seek+read pair of a positional read), not
//! just individual libssh2 calls.

use crate::client::{FileStat, RemoteDirEntry, RemoteFile, SftpClient};
use crate::error::{SftpError, SftpResult};
use parking_lot::Mutex;
use ssh2::{OpenFlags, OpenType};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Arc;
use tracing::trace;

/// Converts POSIX open flags (as delivered by the kernel) to libssh2 flags.
pub fn open_flags_from_posix(flags: i32) -> OpenFlags {
    let mut out = match flags & libc::O_ACCMODE {
        libc::O_WRONLY => OpenFlags::WRITE,
        libc::O_RDWR => OpenFlags::READ | OpenFlags::WRITE,
        _ => OpenFlags::READ,
    };
    if flags & libc::O_APPEND != 0 {
        out |= OpenFlags::APPEND;
    }
    if flags & libc::O_CREAT != 0 {
        out |= OpenFlags::CREATE;
    }
    if flags & libc::O_TRUNC != 0 {
        out |= OpenFlags::TRUNCATE;
    }
    if flags & libc::O_EXCL != 0 {
        out |= OpenFlags::EXCLUSIVE;
    }
    out
}

fn convert_stat(stat: &ssh2::FileStat) -> FileStat {
    FileStat {
        size: stat.size.unwrap_or(0),
        mode: stat.perm,
        is_dir: stat.is_dir(),
        mtime: stat.mtime,
        atime: stat.atime,
    }
}

struct SessionInner {
    /// Session-wide protocol lock; see module docs.
    lock: Mutex<()>,
    /// Kept alive for the lifetime of the SFTP channel.
    _session: ssh2::Session,
    sftp: ssh2::Sftp,
}

/// [`SftpClient`] implementation over an authenticated `ssh2` session.
pub struct Ssh2Client {
    inner: Arc<SessionInner>,
}

impl std::fmt::Debug for Ssh2Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ssh2Client").finish_non_exhaustive()
    }
}

impl Ssh2Client {
    /// Wraps an authenticated session and its SFTP channel.
    ///
    /// Use [`crate::connect`] to produce one from connection options.
    pub fn new(session: ssh2::Session, sftp: ssh2::Sftp) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                lock: Mutex::new(()),
                _session: session,
                sftp,
            }),
        }
    }

    fn wrap_file(&self, file: ssh2::File) -> Box<dyn RemoteFile> {
        Box::new(Ssh2File {
            inner: Arc::clone(&self.inner),
            file: Some(file),
        })
    }
}

impl SftpClient for Ssh2Client {
    fn stat(&self, path: &Path) -> SftpResult<FileStat> {
        trace!(path = %path.display(), "sftp stat");
        let _g = self.inner.lock.lock();
        let stat = self.inner.sftp.stat(path)?;
        Ok(convert_stat(&stat))
    }

    fn read_dir(&self, path: &Path) -> SftpResult<Vec<RemoteDirEntry>> {
        trace!(path = %path.display(), "sftp readdir");
        let _g = self.inner.lock.lock();
        let entries = self.inner.sftp.readdir(path)?;
        Ok(entries
            .into_iter()
            .filter_map(|(entry_path, stat)| {
                let name = entry_path.file_name()?.to_str()?.to_string();
                Some(RemoteDirEntry {
                    name,
                    stat: convert_stat(&stat),
                })
            })
            .collect())
    }

    fn open(&self, path: &Path, flags: i32) -> SftpResult<Box<dyn RemoteFile>> {
        trace!(path = %path.display(), flags, "sftp open");
        let _g = self.inner.lock.lock();
        let file = self
            .inner
            .sftp
            .open_mode(path, open_flags_from_posix(flags), 0o644, OpenType::File)?;
        drop(_g);
        Ok(self.wrap_file(file))
    }

    fn create(&self, path: &Path) -> SftpResult<Box<dyn RemoteFile>> {
        trace!(path = %path.display(), "sftp create");
        let _g = self.inner.lock.lock();
        let file = self.inner.sftp.create(path)?;
        drop(_g);
        Ok(self.wrap_file(file))
    }

    fn mkdir(&self, path: &Path) -> SftpResult<()> {
        trace!(path = %path.display(), "sftp mkdir");
        let _g = self.inner.lock.lock();
        self.inner.sftp.mkdir(path, 0o755)?;
        Ok(())
    }

    fn rmdir(&self, path: &Path) -> SftpResult<()> {
        trace!(path = %path.display(), "sftp rmdir");
        let _g = self.inner.lock.lock();
        self.inner.sftp.rmdir(path)?;
        Ok(())
    }

    fn remove(&self, path: &Path) -> SftpResult<()> {
        trace!(path = %path.display(), "sftp remove");
        let _g = self.inner.lock.lock();
        self.inner.sftp.unlink(path)?;
        Ok(())
    }

    fn rename(&self, old: &Path, new: &Path) -> SftpResult<()> {
        trace!(old = %old.display(), new = %new.display(), "sftp rename");
        let _g = self.inner.lock.lock();
        self.inner.sftp.rename(old, new, None)?;
        Ok(())
    }

    fn chmod(&self, path: &Path, mode: u32) -> SftpResult<()> {
        trace!(path = %path.display(), mode = format_args!("{mode:o}"), "sftp chmod");
        let _g = self.inner.lock.lock();
        self.inner.sftp.setstat(
            path,
            ssh2::FileStat {
                size: None,
                uid: None,
                gid: None,
                perm: Some(mode & 0o7777),
                atime: None,
                mtime: None,
            },
        )?;
        Ok(())
    }
}

/// An open remote file on an `ssh2` session.
struct Ssh2File {
    inner: Arc<SessionInner>,
    /// `None` once closed explicitly.
    file: Option<ssh2::File>,
}

impl Ssh2File {
    fn file(&mut self) -> SftpResult<&mut ssh2::File> {
        self.file
            .as_mut()
            .ok_or_else(|| SftpError::Transport("file handle already closed".to_string()))
    }
}

impl RemoteFile for Ssh2File {
    fn stat(&mut self) -> SftpResult<FileStat> {
        let inner = Arc::clone(&self.inner);
        let _g = inner.lock.lock();
        let stat = self.file()?.stat()?;
        Ok(convert_stat(&stat))
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> SftpResult<usize> {
        let inner = Arc::clone(&self.inner);
        let _g = inner.lock.lock();
        let file = self.file()?;
        file.seek(SeekFrom::Start(offset))?;
        match file.read(buf) {
            Ok(n) => Ok(n),
            // libssh2 signals EOF as a zero-length read already; any error
            // here is a real transfer failure.
            Err(e) => Err(SftpError::Io(e)),
        }
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> SftpResult<usize> {
        let inner = Arc::clone(&self.inner);
        let _g = inner.lock.lock();
        let file = self.file()?;
        file.seek(SeekFrom::Start(offset))?;
        let written = file.write(data)?;
        Ok(written)
    }

    fn close(&mut self) -> SftpResult<()> {
        let inner = Arc::clone(&self.inner);
        let _g = inner.lock.lock();
        match self.file.take() {
            Some(mut file) => {
                file.close()?;
                Ok(())
            }
            None => Ok(()),
        }
    }
}
