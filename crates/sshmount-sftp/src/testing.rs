//! In-memory [`SftpClient`] for tests.
//!
//! [`MemoryClient`] models a small remote filesystem behind a mutex and
//! journals every protocol call so tests can assert not only on state but
//! on which remote operations were (or were not) issued.
//!
//! File contents are shared between the tree and open handles the way an
//! SFTP server shares them: a handle keeps working across rename and
//! unlink of its path.

use crate::client::{FileStat, RemoteDirEntry, RemoteFile, SftpClient};
use crate::error::{SftpError, SftpResult};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const S_IFDIR: u32 = 0o040000;
const S_IFREG: u32 = 0o100000;

/// Fixed timestamp used for every entry; tests only care that times are
/// surfaced, not what they are.
pub const TEST_MTIME: u64 = 1_700_000_000;

type FileData = Arc<Mutex<Vec<u8>>>;

#[derive(Debug, Clone)]
enum Node {
    Dir { mode: u32 },
    File { data: FileData, mode: u32 },
}

impl Node {
    fn file(data: &[u8]) -> Self {
        Node::File {
            data: Arc::new(Mutex::new(data.to_vec())),
            mode: 0o644,
        }
    }

    fn stat(&self) -> FileStat {
        match self {
            Node::Dir { mode } => FileStat {
                size: 0,
                mode: Some(S_IFDIR | mode),
                is_dir: true,
                mtime: Some(TEST_MTIME),
                atime: Some(TEST_MTIME),
            },
            Node::File { data, mode } => FileStat {
                size: data.lock().len() as u64,
                mode: Some(S_IFREG | mode),
                is_dir: false,
                mtime: Some(TEST_MTIME),
                atime: Some(TEST_MTIME),
            },
        }
    }
}

struct State {
    nodes: BTreeMap<PathBuf, Node>,
    calls: Vec<String>,
    /// When set, read_at returns at most this many bytes per call.
    read_cap: Option<usize>,
}

/// An in-memory remote filesystem.
pub struct MemoryClient {
    state: Arc<Mutex<State>>,
}

fn norm(path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        Path::new("/").join(path)
    }
}

fn parent_of(path: &Path) -> PathBuf {
    path.parent().map_or_else(|| PathBuf::from("/"), Path::to_path_buf)
}

impl MemoryClient {
    /// Creates a client whose remote tree contains only the root directory.
    pub fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(PathBuf::from("/"), Node::Dir { mode: 0o755 });
        Self {
            state: Arc::new(Mutex::new(State {
                nodes,
                calls: Vec::new(),
                read_cap: None,
            })),
        }
    }

    /// Seeds a directory (parents are not created implicitly).
    pub fn add_dir(&self, path: impl AsRef<Path>) {
        self.state
            .lock()
            .nodes
            .insert(norm(path.as_ref()), Node::Dir { mode: 0o755 });
    }

    /// Seeds a regular file with the given contents.
    pub fn add_file(&self, path: impl AsRef<Path>, data: &[u8]) {
        self.state
            .lock()
            .nodes
            .insert(norm(path.as_ref()), Node::file(data));
    }

    /// Removes an entry without journaling, simulating a remote that
    /// changed behind the client's back.
    pub fn remove_out_of_band(&self, path: impl AsRef<Path>) {
        self.state.lock().nodes.remove(&norm(path.as_ref()));
    }

    /// Caps every read at `n` bytes to exercise short-read propagation.
    pub fn set_read_cap(&self, n: usize) {
        self.state.lock().read_cap = Some(n);
    }

    /// The protocol calls issued so far, oldest first.
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    /// Forgets the journal; useful to scope assertions to one operation.
    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    /// Raw file contents, if the path names a file.
    pub fn contents(&self, path: impl AsRef<Path>) -> Option<Vec<u8>> {
        match self.state.lock().nodes.get(&norm(path.as_ref())) {
            Some(Node::File { data, .. }) => Some(data.lock().clone()),
            _ => None,
        }
    }

    /// Whether any entry exists at the path.
    pub fn exists(&self, path: impl AsRef<Path>) -> bool {
        self.state.lock().nodes.contains_key(&norm(path.as_ref()))
    }

    fn record(&self, call: String) {
        self.state.lock().calls.push(call);
    }

    fn make_handle(
        &self,
        path: PathBuf,
        data: FileData,
        mode: u32,
        readable: bool,
        writable: bool,
        append: bool,
    ) -> Box<dyn RemoteFile> {
        Box::new(MemoryFile {
            state: Arc::clone(&self.state),
            path,
            data,
            mode,
            readable,
            writable,
            append,
        })
    }
}

impl Default for MemoryClient {
    fn default() -> Self {
        Self::new()
    }
}

impl SftpClient for MemoryClient {
    fn stat(&self, path: &Path) -> SftpResult<FileStat> {
        let path = norm(path);
        self.record(format!("stat {}", path.display()));
        let state = self.state.lock();
        state
            .nodes
            .get(&path)
            .map(Node::stat)
            .ok_or(SftpError::NotFound)
    }

    fn read_dir(&self, path: &Path) -> SftpResult<Vec<RemoteDirEntry>> {
        let path = norm(path);
        self.record(format!("readdir {}", path.display()));
        let state = self.state.lock();
        match state.nodes.get(&path) {
            Some(Node::Dir { .. }) => {}
            Some(Node::File { .. }) => return Err(SftpError::NotADirectory),
            None => return Err(SftpError::NotFound),
        }
        Ok(state
            .nodes
            .iter()
            .filter(|(p, _)| p.parent() == Some(path.as_path()))
            .filter_map(|(p, node)| {
                Some(RemoteDirEntry {
                    name: p.file_name()?.to_str()?.to_string(),
                    stat: node.stat(),
                })
            })
            .collect())
    }

    fn open(&self, path: &Path, flags: i32) -> SftpResult<Box<dyn RemoteFile>> {
        let path = norm(path);
        self.record(format!("open {} flags={flags:#o}", path.display()));
        let accmode = flags & libc::O_ACCMODE;
        let readable = accmode == libc::O_RDONLY || accmode == libc::O_RDWR;
        let writable = accmode == libc::O_WRONLY || accmode == libc::O_RDWR;

        let mut state = self.state.lock();
        let existing = match state.nodes.get(&path) {
            Some(Node::Dir { .. }) => return Err(SftpError::IsDirectory),
            Some(Node::File { data, mode }) => Some((Arc::clone(data), *mode)),
            None => None,
        };
        let (data, mode) = match existing {
            Some((data, mode)) => {
                if flags & libc::O_CREAT != 0 && flags & libc::O_EXCL != 0 {
                    return Err(SftpError::AlreadyExists);
                }
                if writable && flags & libc::O_TRUNC != 0 {
                    data.lock().clear();
                }
                (data, mode)
            }
            None => {
                if flags & libc::O_CREAT == 0 {
                    return Err(SftpError::NotFound);
                }
                if !state.nodes.contains_key(&parent_of(&path)) {
                    return Err(SftpError::NotFound);
                }
                let node = Node::file(b"");
                let data = match &node {
                    Node::File { data, .. } => Arc::clone(data),
                    Node::Dir { .. } => unreachable!(),
                };
                state.nodes.insert(path.clone(), node);
                (data, 0o644)
            }
        };
        drop(state);

        Ok(self.make_handle(path, data, mode, readable, writable, flags & libc::O_APPEND != 0))
    }

    fn create(&self, path: &Path) -> SftpResult<Box<dyn RemoteFile>> {
        let path = norm(path);
        self.record(format!("create {}", path.display()));
        let mut state = self.state.lock();
        if let Some(Node::Dir { .. }) = state.nodes.get(&path) {
            return Err(SftpError::IsDirectory);
        }
        if !state.nodes.contains_key(&parent_of(&path)) {
            return Err(SftpError::NotFound);
        }
        let node = Node::file(b"");
        let data = match &node {
            Node::File { data, .. } => Arc::clone(data),
            Node::Dir { .. } => unreachable!(),
        };
        state.nodes.insert(path.clone(), node);
        drop(state);

        Ok(self.make_handle(path, data, 0o644, true, true, false))
    }

    fn mkdir(&self, path: &Path) -> SftpResult<()> {
        let path = norm(path);
        self.record(format!("mkdir {}", path.display()));
        let mut state = self.state.lock();
        if state.nodes.contains_key(&path) {
            return Err(SftpError::AlreadyExists);
        }
        if !matches!(state.nodes.get(&parent_of(&path)), Some(Node::Dir { .. })) {
            return Err(SftpError::NotFound);
        }
        state.nodes.insert(path, Node::Dir { mode: 0o755 });
        Ok(())
    }

    fn rmdir(&self, path: &Path) -> SftpResult<()> {
        let path = norm(path);
        self.record(format!("rmdir {}", path.display()));
        let mut state = self.state.lock();
        match state.nodes.get(&path) {
            Some(Node::Dir { .. }) => {}
            Some(Node::File { .. }) => return Err(SftpError::NotADirectory),
            None => return Err(SftpError::NotFound),
        }
        let has_children = state
            .nodes
            .keys()
            .any(|p| p.parent() == Some(path.as_path()));
        if has_children {
            return Err(SftpError::NotEmpty);
        }
        state.nodes.remove(&path);
        Ok(())
    }

    fn remove(&self, path: &Path) -> SftpResult<()> {
        let path = norm(path);
        self.record(format!("remove {}", path.display()));
        let mut state = self.state.lock();
        match state.nodes.get(&path) {
            Some(Node::File { .. }) => {}
            Some(Node::Dir { .. }) => return Err(SftpError::IsDirectory),
            None => return Err(SftpError::NotFound),
        }
        state.nodes.remove(&path);
        Ok(())
    }

    fn rename(&self, old: &Path, new: &Path) -> SftpResult<()> {
        let old = norm(old);
        let new = norm(new);
        self.record(format!("rename {} -> {}", old.display(), new.display()));
        let mut state = self.state.lock();
        if !state.nodes.contains_key(&old) {
            return Err(SftpError::NotFound);
        }
        if !matches!(state.nodes.get(&parent_of(&new)), Some(Node::Dir { .. })) {
            return Err(SftpError::NotFound);
        }
        if let Some(Node::Dir { .. }) = state.nodes.get(&new) {
            let occupied = state
                .nodes
                .keys()
                .any(|p| p.parent() == Some(new.as_path()));
            if occupied {
                return Err(SftpError::NotEmpty);
            }
        }
        state.nodes.remove(&new);

        // Move the entry and, for directories, its whole subtree.
        let moved: Vec<(PathBuf, Node)> = state
            .nodes
            .iter()
            .filter(|(p, _)| p.as_path() == old || p.starts_with(&old))
            .map(|(p, n)| (p.clone(), n.clone()))
            .collect();
        for (p, _) in &moved {
            state.nodes.remove(p);
        }
        for (p, node) in moved {
            let rel = p.strip_prefix(&old).expect("prefix checked above");
            let dest = if rel.as_os_str().is_empty() {
                new.clone()
            } else {
                new.join(rel)
            };
            state.nodes.insert(dest, node);
        }
        Ok(())
    }

    fn chmod(&self, path: &Path, mode: u32) -> SftpResult<()> {
        let path = norm(path);
        self.record(format!("chmod {} {:o}", path.display(), mode));
        let mut state = self.state.lock();
        match state.nodes.get_mut(&path) {
            Some(Node::Dir { mode: m }) | Some(Node::File { mode: m, .. }) => {
                *m = mode & 0o7777;
                Ok(())
            }
            None => Err(SftpError::NotFound),
        }
    }
}

/// An open handle onto shared file contents. The contents follow the node,
/// so the handle stays valid across rename and unlink of its path.
struct MemoryFile {
    state: Arc<Mutex<State>>,
    path: PathBuf,
    data: FileData,
    mode: u32,
    readable: bool,
    writable: bool,
    append: bool,
}

impl RemoteFile for MemoryFile {
    fn stat(&mut self) -> SftpResult<FileStat> {
        Ok(FileStat {
            size: self.data.lock().len() as u64,
            mode: Some(S_IFREG | self.mode),
            is_dir: false,
            mtime: Some(TEST_MTIME),
            atime: Some(TEST_MTIME),
        })
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> SftpResult<usize> {
        if !self.readable {
            return Err(SftpError::PermissionDenied);
        }
        let cap = self.state.lock().read_cap;
        let data = self.data.lock();
        let offset = offset as usize;
        if offset >= data.len() {
            return Ok(0);
        }
        let mut n = buf.len().min(data.len() - offset);
        if let Some(cap) = cap {
            n = n.min(cap);
        }
        buf[..n].copy_from_slice(&data[offset..offset + n]);
        Ok(n)
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> SftpResult<usize> {
        if !self.writable {
            return Err(SftpError::PermissionDenied);
        }
        let mut content = self.data.lock();
        let offset = if self.append {
            content.len()
        } else {
            offset as usize
        };
        if offset > content.len() {
            content.resize(offset, 0);
        }
        let end = offset + data.len();
        if end > content.len() {
            content.resize(end, 0);
        }
        content[offset..end].copy_from_slice(data);
        Ok(data.len())
    }

    fn close(&mut self) -> SftpResult<()> {
        self.state
            .lock()
            .calls
            .push(format!("close {}", self.path.display()));
        Ok(())
    }
}
