//! FUSE filesystem implementation bridging to a remote SFTP tree.
//!
//! Each kernel upcall executes synchronously on the calling thread,
//! issuing zero or more SFTP calls and mutating the inode table as it
//! goes. Operation logic lives in inherent methods returning
//! [`FsResult`]; the `fuser::Filesystem` impl is a thin layer that maps
//! results onto kernel replies. That split keeps the semantics testable
//! without a mounted kernel session.
//!
//! Cache discipline, in short:
//! - attributes and lookups are cached by the *kernel*, bounded by the
//!   configured TTLs; the core re-stats on every upcall,
//! - the inode table is the only metadata the core keeps, and child-table
//!   removal always precedes the corresponding remote removal so a
//!   subsequent lookup re-stats authoritatively.

use crate::config::MountConfig;
use crate::dirstream::{DirStream, DirStreamEntry};
use crate::error::{FsError, FsResult};
use crate::handles::{HandleTable, OpenHandle};
use crate::inode::{InodeTable, NodeKind, ROOT_INODE};
use crate::stats::MountStats;
use dashmap::DashMap;
use fuser::{
    FileAttr, FileType, Filesystem, KernelConfig, ReplyAttr, ReplyData, ReplyDirectory,
    ReplyEmpty, ReplyEntry, ReplyOpen, ReplyWrite, Request, TimeOrNow,
};
use libc::c_int;
use sshmount_sftp::{FileStat, SftpClient, SftpError};
use std::ffi::OsStr;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, trace, warn};

/// Block size reported in file attributes and statfs.
const BLOCK_SIZE: u32 = 4096;

/// Directory type bits, as carried in SFTP mode fields.
const S_IFDIR: u32 = 0o040000;

/// Reply flags for open: the kernel may keep page-cache data across opens,
/// cache directory entries, and use streaming read-ahead. Content rarely
/// changes mid-session and large reads should stream.
const OPEN_REPLY_FLAGS: u32 =
    fuser::consts::FOPEN_KEEP_CACHE | fuser::consts::FOPEN_CACHE_DIR | fuser::consts::FOPEN_STREAM;

/// State of one opendir handle: the one-shot stream, the `.`/`..` entries
/// the kernel expects ahead of it, and the running offset.
#[derive(Debug)]
struct DirState {
    stream: DirStream,
    parent: u64,
    dots_emitted: u8,
    offset: i64,
}

/// FUSE filesystem over an SFTP-reachable directory tree.
pub struct SshFs {
    /// Shared remote protocol capability.
    sftp: Arc<dyn SftpClient>,
    /// Remote filesystem root the tree is anchored at. Immutable.
    root_path: PathBuf,
    /// Inode bookkeeping; the kernel-visible child tables live here.
    inodes: InodeTable,
    /// Open file handles.
    handles: HandleTable,
    /// Live directory streams, one per opendir handle.
    dir_streams: DashMap<u64, DirState>,
    /// Id source for opendir handles (disjoint from file handles).
    next_dir_fh: AtomicU64,
    config: MountConfig,
    stats: Arc<MountStats>,
    uid: u32,
    gid: u32,
}

impl SshFs {
    /// Creates a filesystem rooted at `root_path` on the remote side.
    pub fn new(
        sftp: Arc<dyn SftpClient>,
        root_path: impl Into<PathBuf>,
        config: MountConfig,
    ) -> Self {
        let uid = unsafe { libc::getuid() };
        let gid = unsafe { libc::getgid() };
        Self {
            sftp,
            root_path: root_path.into(),
            inodes: InodeTable::new(),
            handles: HandleTable::new(),
            dir_streams: DashMap::new(),
            next_dir_fh: AtomicU64::new(1),
            config,
            stats: Arc::new(MountStats::new()),
            uid,
            gid,
        }
    }

    /// Shared statistics handle for the outer harness.
    pub fn stats(&self) -> Arc<MountStats> {
        Arc::clone(&self.stats)
    }

    /// The remote path of a node: the remote root joined with the node's
    /// path from the mount root. Recomputed on every call — never cached —
    /// so renamed directories carry their subtrees implicitly.
    pub fn remote_path(&self, ino: u64) -> FsResult<PathBuf> {
        let relative = self
            .inodes
            .path_from_root(ino)
            .ok_or(FsError::InvalidInode(ino))?;
        Ok(self.root_path.join(relative))
    }

    fn remote_child_path(&self, parent: u64, name: &str) -> FsResult<PathBuf> {
        Ok(self.remote_path(parent)?.join(name))
    }

    fn require_dir(&self, ino: u64) -> FsResult<()> {
        match self.inodes.kind(ino) {
            Some(NodeKind::Directory) => Ok(()),
            Some(NodeKind::RegularFile) => Err(FsError::NotADirectory(ino)),
            None => Err(FsError::InvalidInode(ino)),
        }
    }

    fn system_time(secs: Option<u64>) -> Option<SystemTime> {
        secs.map(|s| UNIX_EPOCH + Duration::from_secs(s))
    }

    /// Builds kernel attributes from a remote stat.
    ///
    /// The protocol surfaces only a modification time, so ctime and crtime
    /// both report mtime; atime is taken when available.
    fn attr_from_stat(&self, ino: u64, kind: NodeKind, stat: &FileStat) -> FileAttr {
        let mtime = Self::system_time(stat.mtime).unwrap_or_else(SystemTime::now);
        let atime = Self::system_time(stat.atime).unwrap_or(mtime);
        let (file_type, size, nlink) = match kind {
            NodeKind::Directory => (FileType::Directory, 0, 2),
            NodeKind::RegularFile => (FileType::RegularFile, stat.size, 1),
        };
        FileAttr {
            ino,
            size,
            blocks: size.div_ceil(u64::from(BLOCK_SIZE)),
            atime,
            mtime,
            ctime: mtime,
            crtime: mtime,
            kind: file_type,
            perm: stat.perm() as u16,
            nlink,
            uid: self.uid,
            gid: self.gid,
            rdev: 0,
            blksize: BLOCK_SIZE,
            flags: 0,
        }
    }

    /// Attributes for a node answered from the tree alone.
    ///
    /// Used when returning an already-installed child: identity is what
    /// the reply carries; size and times are refreshed by the kernel's
    /// next getattr once the entry TTL lapses.
    fn cached_attr(&self, ino: u64, kind: NodeKind) -> FileAttr {
        let stat = FileStat {
            is_dir: kind.is_directory(),
            ..FileStat::default()
        };
        self.attr_from_stat(ino, kind, &stat)
    }

    // ==================== Operations ====================

    /// Getattr: stat via the handle when one is supplied, else by path.
    pub fn node_attr(&self, ino: u64, fh: Option<u64>) -> FsResult<FileAttr> {
        let kind = self.inodes.kind(ino).ok_or(FsError::InvalidInode(ino))?;
        if let Some(fh) = fh
            && let Some(mut handle) = self.handles.get_mut(fh)
        {
            let stat = handle.file.stat()?;
            return Ok(self.attr_from_stat(ino, kind, &stat));
        }
        let path = self.remote_path(ino)?;
        let stat = self.sftp.stat(&path)?;
        Ok(self.attr_from_stat(ino, kind, &stat))
    }

    /// Lookup: an installed child is returned directly — its identity is
    /// authoritative and no remote call is made. Only unknown names go to
    /// the remote, and a not-found there is propagated distinctly so the
    /// kernel can cache the negative entry. Reconciliation with a changed
    /// remote happens when a removal drops the child and the next lookup
    /// re-stats authoritatively.
    pub fn lookup_child(&self, parent: u64, name: &str) -> FsResult<(u64, FileAttr)> {
        self.require_dir(parent)?;

        if let Some(existing) = self.inodes.child(parent, name) {
            let kind = self
                .inodes
                .kind(existing)
                .ok_or(FsError::InvalidInode(existing))?;
            if let Some(entry) = self.inodes.get(existing) {
                entry.inc_nlookup();
            }
            return Ok((existing, self.cached_attr(existing, kind)));
        }

        let path = self.remote_child_path(parent, name)?;
        let stat = self.sftp.stat(&path)?;
        let discovered = NodeKind::from_is_dir(stat.is_dir);
        let ino = self.inodes.install(parent, name, discovered);
        // A concurrent install may have won with an earlier discovery; that
        // identity wins.
        let kind = self.inodes.kind(ino).unwrap_or(discovered);
        Ok((ino, self.attr_from_stat(ino, kind, &stat)))
    }

    /// Readdir: captures the remote listing as a one-shot stream in the
    /// remote's order. Existing children keep their identity; new ones are
    /// installed without touching lookup counts.
    pub fn list_dir(&self, ino: u64) -> FsResult<DirStream> {
        self.require_dir(ino)?;
        let path = self.remote_path(ino)?;
        let listing = self.sftp.read_dir(&path)?;

        let mut entries = Vec::with_capacity(listing.len());
        for remote in listing {
            let discovered = NodeKind::from_is_dir(remote.stat.is_dir);
            let child = self.inodes.install_no_lookup(ino, &remote.name, discovered);
            let kind = self.inodes.kind(child).unwrap_or(discovered);
            entries.push(DirStreamEntry {
                name: remote.name,
                ino: child,
                kind,
            });
        }
        Ok(DirStream::new(entries))
    }

    /// Mkdir: an existing child is busy and costs no remote call; otherwise
    /// mkdir + chmod, and the child is installed only after both succeed.
    pub fn make_dir(&self, parent: u64, name: &str, mode: u32) -> FsResult<(u64, FileAttr)> {
        self.require_dir(parent)?;
        if self.inodes.child(parent, name).is_some() {
            return Err(FsError::Busy(name.to_string()));
        }
        let path = self.remote_child_path(parent, name)?;
        self.sftp.mkdir(&path)?;
        self.sftp.chmod(&path, mode)?;

        let ino = self.inodes.install(parent, name, NodeKind::Directory);
        let stat = FileStat {
            size: 0,
            mode: Some(S_IFDIR | (mode & 0o7777)),
            is_dir: true,
            mtime: None,
            atime: None,
        };
        Ok((ino, self.attr_from_stat(ino, NodeKind::Directory, &stat)))
    }

    /// Create: an existing child is reused (reopened with the caller's
    /// flags); otherwise create + chmod + stat, with the child installed
    /// only on full success. The remote create's own handle is kept.
    pub fn create_file(
        &self,
        parent: u64,
        name: &str,
        flags: i32,
        mode: u32,
    ) -> FsResult<(u64, FileAttr, u64)> {
        self.require_dir(parent)?;
        let path = self.remote_child_path(parent, name)?;

        if let Some(existing) = self.inodes.child(parent, name) {
            let kind = self
                .inodes
                .kind(existing)
                .ok_or(FsError::InvalidInode(existing))?;
            let stat = self.sftp.stat(&path)?;
            let file = self.sftp.open(&path, flags)?;
            let fh = self.handles.insert(OpenHandle { file, flags });
            self.stats.handle_opened();
            if let Some(entry) = self.inodes.get(existing) {
                entry.inc_nlookup();
            }
            return Ok((existing, self.attr_from_stat(existing, kind, &stat), fh));
        }

        let file = self.sftp.create(&path)?;
        self.sftp.chmod(&path, mode)?;
        let stat = self.sftp.stat(&path)?;

        let ino = self.inodes.install(parent, name, NodeKind::RegularFile);
        let fh = self.handles.insert(OpenHandle { file, flags });
        self.stats.handle_opened();
        Ok((ino, self.attr_from_stat(ino, NodeKind::RegularFile, &stat), fh))
    }

    /// Open: the kernel's flags go to the remote verbatim.
    pub fn open_node(&self, ino: u64, flags: i32) -> FsResult<u64> {
        match self.inodes.kind(ino) {
            Some(NodeKind::RegularFile) => {}
            Some(NodeKind::Directory) => return Err(FsError::IsDirectory(ino)),
            None => return Err(FsError::InvalidInode(ino)),
        }
        let path = self.remote_path(ino)?;
        let file = self.sftp.open(&path, flags)?;
        let fh = self.handles.insert(OpenHandle { file, flags });
        self.stats.handle_opened();
        Ok(fh)
    }

    /// Read: positional through the handle; short reads propagate and a
    /// read past EOF is empty, not an error. Unknown handles fall back to
    /// an ad-hoc open-transfer-close for kernels that re-enter without one.
    pub fn read_node(&self, ino: u64, fh: u64, offset: u64, size: usize) -> FsResult<Vec<u8>> {
        let mut buf = vec![0u8; size];
        let n = if let Some(mut handle) = self.handles.get_mut(fh) {
            handle.file.read_at(offset, &mut buf)?
        } else {
            debug!(ino, fh, "read without a known handle, opening ad hoc");
            let path = self.remote_path(ino)?;
            let mut file = self.sftp.open(&path, libc::O_RDONLY)?;
            let result = file.read_at(offset, &mut buf);
            let _ = file.close();
            result?
        };
        buf.truncate(n);
        Ok(buf)
    }

    /// Write: symmetric to read. Every call produces a remote write; there
    /// is no write-back buffering anywhere in this design.
    pub fn write_node(&self, ino: u64, fh: u64, offset: u64, data: &[u8]) -> FsResult<usize> {
        if let Some(mut handle) = self.handles.get_mut(fh) {
            return Ok(handle.file.write_at(offset, data)?);
        }
        debug!(ino, fh, "write without a known handle, opening ad hoc");
        let path = self.remote_path(ino)?;
        let mut file = self.sftp.open(&path, libc::O_WRONLY)?;
        let result = file.write_at(offset, data);
        let _ = file.close();
        Ok(result?)
    }

    /// Release: close the remote handle. Always attempted; a close error
    /// is reported but the handle is gone either way.
    pub fn release_handle(&self, fh: u64) -> FsResult<()> {
        match self.handles.remove(fh) {
            Some(mut handle) => {
                self.stats.handle_closed();
                handle.file.close()?;
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// Rmdir: the child-table removal precedes the remote call; a remote
    /// error is reported but the child stays absent — diverging from the
    /// remote beats serving stale identity.
    pub fn remove_dir(&self, parent: u64, name: &str) -> FsResult<()> {
        self.require_dir(parent)?;
        let path = self.remote_child_path(parent, name)?;
        self.inodes.remove_child(parent, name);
        self.sftp.rmdir(&path)?;
        Ok(())
    }

    /// Unlink: same ordering as rmdir, with the file removal call.
    pub fn remove_file(&self, parent: u64, name: &str) -> FsResult<()> {
        self.require_dir(parent)?;
        let path = self.remote_child_path(parent, name)?;
        self.inodes.remove_child(parent, name);
        self.sftp.remove(&path)?;
        Ok(())
    }

    /// Rename: the node keeps its stable identity under the new name, so
    /// open handles survive. Exchange/no-replace flags are not honored.
    pub fn rename_node(
        &self,
        parent: u64,
        name: &str,
        new_parent: u64,
        new_name: &str,
    ) -> FsResult<()> {
        self.require_dir(parent)?;
        self.require_dir(new_parent)?;
        let child = self
            .inodes
            .child(parent, name)
            .ok_or(FsError::Sftp(SftpError::NotFound))?;

        // Both paths are computed before the tree changes shape.
        let old_path = self.remote_child_path(parent, name)?;
        let new_path = self.remote_child_path(new_parent, new_name)?;

        self.inodes.retarget(child, new_parent, new_name);
        self.sftp.rename(&old_path, &new_path)?;
        Ok(())
    }

    /// Setattr: a supplied mode is pushed as chmod; requested timestamps
    /// are reflected back to the caller without a remote call (the adapter
    /// contract has no settime; the kernel's view self-corrects at the
    /// next stat).
    pub fn set_attr(
        &self,
        ino: u64,
        mode: Option<u32>,
        atime: Option<SystemTime>,
        mtime: Option<SystemTime>,
        fh: Option<u64>,
    ) -> FsResult<FileAttr> {
        if let Some(mode) = mode {
            let path = self.remote_path(ino)?;
            self.sftp.chmod(&path, mode)?;
        }
        let mut attr = self.node_attr(ino, fh)?;
        if let Some(mode) = mode {
            attr.perm = (mode & 0o7777) as u16;
        }
        if let Some(atime) = atime {
            attr.atime = atime;
        }
        if let Some(mtime) = mtime {
            attr.mtime = mtime;
        }
        Ok(attr)
    }

    fn file_type(kind: NodeKind) -> FileType {
        match kind {
            NodeKind::Directory => FileType::Directory,
            NodeKind::RegularFile => FileType::RegularFile,
        }
    }
}

impl Filesystem for SshFs {
    fn init(&mut self, _req: &Request<'_>, _config: &mut KernelConfig) -> Result<(), c_int> {
        info!(root = %self.root_path.display(), "filesystem initialized");
        Ok(())
    }

    fn destroy(&mut self) {
        info!(stats = ?self.stats.snapshot(), "filesystem destroyed");
    }

    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        self.stats.record_metadata_op();
        let Some(name) = name.to_str() else {
            self.stats.record_error();
            reply.error(libc::EINVAL);
            return;
        };
        trace!(parent, name, "lookup");

        match self.lookup_child(parent, name) {
            Ok((_, attr)) => reply.entry(&self.config.entry_ttl, &attr, 0),
            Err(e) => {
                // Negative lookups are routine; only log the unusual ones.
                if e.to_errno() != libc::ENOENT {
                    self.stats.record_error();
                    debug!(parent, name, error = %e, "lookup failed");
                }
                reply.error(e.to_errno());
            }
        }
    }

    fn forget(&mut self, _req: &Request<'_>, ino: u64, nlookup: u64) {
        trace!(ino, nlookup, "forget");
        self.inodes.forget(ino, nlookup);
        self.stats.set_inode_count(self.inodes.len() as u64);
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, fh: Option<u64>, reply: ReplyAttr) {
        self.stats.record_metadata_op();
        trace!(ino, ?fh, "getattr");

        match self.node_attr(ino, fh) {
            Ok(attr) => reply.attr(&self.config.attr_ttl, &attr),
            Err(e) => {
                self.stats.record_error();
                reply.error(e.to_errno());
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn setattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        _size: Option<u64>,
        atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        self.stats.record_metadata_op();
        trace!(ino, ?mode, ?fh, "setattr");

        let resolve = |t: TimeOrNow| match t {
            TimeOrNow::Now => SystemTime::now(),
            TimeOrNow::SpecificTime(t) => t,
        };
        match self.set_attr(ino, mode, atime.map(resolve), mtime.map(resolve), fh) {
            Ok(attr) => reply.attr(&self.config.attr_ttl, &attr),
            Err(e) => {
                self.stats.record_error();
                reply.error(e.to_errno());
            }
        }
    }

    fn mkdir(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        self.stats.record_metadata_op();
        let Some(name) = name.to_str() else {
            self.stats.record_error();
            reply.error(libc::EINVAL);
            return;
        };
        trace!(parent, name, mode = format_args!("{mode:o}"), "mkdir");

        match self.make_dir(parent, name, mode) {
            Ok((_, attr)) => reply.entry(&self.config.entry_ttl, &attr, 0),
            Err(e) => {
                self.stats.record_error();
                reply.error(e.to_errno());
            }
        }
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        self.stats.record_metadata_op();
        let Some(name) = name.to_str() else {
            self.stats.record_error();
            reply.error(libc::EINVAL);
            return;
        };
        trace!(parent, name, "unlink");

        match self.remove_file(parent, name) {
            Ok(()) => reply.ok(),
            Err(e) => {
                self.stats.record_error();
                reply.error(e.to_errno());
            }
        }
    }

    fn rmdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        self.stats.record_metadata_op();
        let Some(name) = name.to_str() else {
            self.stats.record_error();
            reply.error(libc::EINVAL);
            return;
        };
        trace!(parent, name, "rmdir");

        match self.remove_dir(parent, name) {
            Ok(()) => reply.ok(),
            Err(e) => {
                self.stats.record_error();
                reply.error(e.to_errno());
            }
        }
    }

    fn rename(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        flags: u32,
        reply: ReplyEmpty,
    ) {
        self.stats.record_metadata_op();
        let (Some(name), Some(newname)) = (name.to_str(), newname.to_str()) else {
            self.stats.record_error();
            reply.error(libc::EINVAL);
            return;
        };
        if flags != 0 {
            // RENAME_EXCHANGE / RENAME_NOREPLACE are not honored.
            debug!(flags, "rename flags ignored");
        }
        trace!(parent, name, newparent, newname, "rename");

        match self.rename_node(parent, name, newparent, newname) {
            Ok(()) => reply.ok(),
            Err(e) => {
                self.stats.record_error();
                reply.error(e.to_errno());
            }
        }
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        trace!(ino, flags, "open");
        match self.open_node(ino, flags) {
            Ok(fh) => reply.opened(fh, OPEN_REPLY_FLAGS),
            Err(e) => {
                self.stats.record_error();
                reply.error(e.to_errno());
            }
        }
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        trace!(ino, fh, offset, size, "read");
        if offset < 0 {
            reply.error(libc::EINVAL);
            return;
        }
        match self.read_node(ino, fh, offset as u64, size as usize) {
            Ok(data) => {
                self.stats.record_read(data.len() as u64);
                reply.data(&data);
            }
            Err(e) => {
                self.stats.record_error();
                reply.error(e.to_errno());
            }
        }
    }

    fn write(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        trace!(ino, fh, offset, len = data.len(), "write");
        if offset < 0 {
            reply.error(libc::EINVAL);
            return;
        }
        match self.write_node(ino, fh, offset as u64, data) {
            Ok(written) => {
                self.stats.record_write(written as u64);
                reply.written(written as u32);
            }
            Err(e) => {
                self.stats.record_error();
                reply.error(e.to_errno());
            }
        }
    }

    fn flush(&mut self, _req: &Request<'_>, ino: u64, fh: u64, _lock_owner: u64, reply: ReplyEmpty) {
        // Nothing buffered locally; every write already hit the remote.
        trace!(ino, fh, "flush");
        reply.ok();
    }

    fn fsync(&mut self, _req: &Request<'_>, ino: u64, fh: u64, _datasync: bool, reply: ReplyEmpty) {
        // The remote is authoritative; there is no local buffer to flush.
        trace!(ino, fh, "fsync");
        reply.ok();
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        trace!(fh, "release");
        match self.release_handle(fh) {
            Ok(()) => reply.ok(),
            Err(e) => {
                self.stats.record_error();
                warn!(fh, error = %e, "remote close failed");
                reply.error(e.to_errno());
            }
        }
    }

    fn opendir(&mut self, _req: &Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
        trace!(ino, "opendir");
        if let Err(e) = self.require_dir(ino) {
            self.stats.record_error();
            reply.error(e.to_errno());
            return;
        }
        // No remote call here; the listing is captured when readdir runs.
        let fh = self.next_dir_fh.fetch_add(1, Ordering::Relaxed);
        reply.opened(fh, fuser::consts::FOPEN_CACHE_DIR);
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        self.stats.record_metadata_op();
        trace!(ino, fh, offset, "readdir");

        if offset == 0 {
            match self.list_dir(ino) {
                Ok(stream) => {
                    let parent = self.inodes.get(ino).map_or(ROOT_INODE, |e| e.parent);
                    self.dir_streams.insert(
                        fh,
                        DirState {
                            stream,
                            parent,
                            dots_emitted: 0,
                            offset: 0,
                        },
                    );
                }
                Err(e) => {
                    self.stats.record_error();
                    reply.error(e.to_errno());
                    return;
                }
            }
        }

        let Some(mut state) = self.dir_streams.get_mut(&fh) else {
            // Stream already drained (or unknown handle): nothing left.
            reply.ok();
            return;
        };
        loop {
            // The kernel expects "." and ".." ahead of the stream.
            if state.dots_emitted < 2 {
                let (name, target) = if state.dots_emitted == 0 {
                    (".", ino)
                } else {
                    ("..", state.parent)
                };
                let next_offset = state.offset + 1;
                if reply.add(target, next_offset, FileType::Directory, name) {
                    break;
                }
                state.dots_emitted += 1;
                state.offset = next_offset;
                continue;
            }

            let Some(entry) = state.stream.next() else {
                break;
            };
            let next_offset = state.offset + 1;
            if reply.add(entry.ino, next_offset, Self::file_type(entry.kind), &entry.name) {
                // Reply buffer full; the entry goes back for the next call.
                state.stream.push_back_front(entry);
                break;
            }
            state.offset = next_offset;
        }
        reply.ok();
    }

    fn releasedir(&mut self, _req: &Request<'_>, _ino: u64, fh: u64, _flags: i32, reply: ReplyEmpty) {
        trace!(fh, "releasedir");
        if let Some((_, state)) = self.dir_streams.remove(&fh) {
            state.stream.close();
        }
        reply.ok();
    }

    fn create(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        flags: i32,
        reply: fuser::ReplyCreate,
    ) {
        self.stats.record_metadata_op();
        let Some(name) = name.to_str() else {
            self.stats.record_error();
            reply.error(libc::EINVAL);
            return;
        };
        trace!(parent, name, mode = format_args!("{mode:o}"), flags, "create");

        match self.create_file(parent, name, flags, mode) {
            Ok((_, attr, fh)) => {
                reply.created(&self.config.entry_ttl, &attr, 0, fh, OPEN_REPLY_FLAGS);
            }
            Err(e) => {
                self.stats.record_error();
                reply.error(e.to_errno());
            }
        }
    }

    fn access(&mut self, _req: &Request<'_>, ino: u64, mask: i32, reply: ReplyEmpty) {
        // Authorization is the kernel's job, from the attributes getattr
        // reports; this upcall never fails.
        trace!(ino, mask, "access");
        reply.ok();
    }

    fn statfs(&mut self, _req: &Request<'_>, _ino: u64, reply: fuser::ReplyStatfs) {
        // The contract has no statvfs; report sane constants.
        reply.statfs(
            1_000_000,
            500_000,
            500_000,
            1_000_000,
            500_000,
            BLOCK_SIZE,
            255,
            BLOCK_SIZE,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sshmount_sftp::testing::MemoryClient;

    const S_IFREG: u32 = 0o100000;

    fn fs_with(client: MemoryClient) -> SshFs {
        SshFs::new(Arc::new(client), "/srv", MountConfig::default())
    }

    #[test]
    fn attr_times_collapse_to_mtime() {
        let fs = fs_with(MemoryClient::new());
        let stat = FileStat {
            size: 10,
            mode: Some(S_IFREG | 0o600),
            is_dir: false,
            mtime: Some(1_000),
            atime: None,
        };
        let attr = fs.attr_from_stat(7, NodeKind::RegularFile, &stat);
        assert_eq!(attr.ino, 7);
        assert_eq!(attr.size, 10);
        assert_eq!(attr.perm, 0o600);
        assert_eq!(attr.mtime, UNIX_EPOCH + Duration::from_secs(1_000));
        assert_eq!(attr.ctime, attr.mtime);
        assert_eq!(attr.crtime, attr.mtime);
        // No atime from the remote: fall back to mtime.
        assert_eq!(attr.atime, attr.mtime);
    }

    #[test]
    fn attr_prefers_remote_atime() {
        let fs = fs_with(MemoryClient::new());
        let stat = FileStat {
            size: 0,
            mode: Some(S_IFDIR | 0o755),
            is_dir: true,
            mtime: Some(1_000),
            atime: Some(2_000),
        };
        let attr = fs.attr_from_stat(2, NodeKind::Directory, &stat);
        assert_eq!(attr.kind, FileType::Directory);
        assert_eq!(attr.atime, UNIX_EPOCH + Duration::from_secs(2_000));
    }

    #[test]
    fn remote_path_is_anchored_at_root() {
        let client = MemoryClient::new();
        client.add_dir("/srv/a");
        let fs = fs_with(client);
        let (ino, _) = fs.lookup_child(ROOT_INODE, "a").unwrap();
        assert_eq!(fs.remote_path(ino).unwrap(), PathBuf::from("/srv/a"));
    }
}
