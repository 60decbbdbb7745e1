//! Inode management for the FUSE filesystem.
//!
//! [`InodeTable`] is the kernel-transport inode container: a mapping from
//! inode numbers to entries, plus a child index keyed by `(parent, name)`.
//! A node's position in the tree is its parent link and name; its remote
//! path is *derived* by walking those links on every call, never cached,
//! so renaming a directory implicitly relocates its whole subtree.
//!
//! Reference counting follows the FUSE forget protocol: `lookup`, `mkdir`
//! and `create` increment `nlookup`, `readdir` does not, and an entry is
//! evicted only when the kernel's forget drops the count to zero.

use dashmap::DashMap;
use dashmap::mapref::one::Ref;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

/// The root inode number (FUSE convention).
pub const ROOT_INODE: u64 = 1;

/// The coarse kind of a filesystem entry. Distinct from permission bits.
///
/// Set exactly once when the node is first discovered and never changed in
/// place; a type change on the remote is handled by removing and
/// re-discovering the child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Directory,
    RegularFile,
}

impl NodeKind {
    /// Classifies from a remote stat's directory flag.
    pub fn from_is_dir(is_dir: bool) -> Self {
        if is_dir {
            NodeKind::Directory
        } else {
            NodeKind::RegularFile
        }
    }

    pub fn is_directory(self) -> bool {
        matches!(self, NodeKind::Directory)
    }
}

/// An entry in the inode table.
#[derive(Debug)]
pub struct InodeEntry {
    /// Parent inode. The root is its own parent.
    pub parent: u64,
    /// Name under the parent: a single path component, empty for the root.
    pub name: String,
    /// Directory vs regular file, fixed at creation.
    pub kind: NodeKind,
    /// Kernel lookup count; eviction only at zero.
    nlookup: AtomicU64,
}

impl InodeEntry {
    fn new(parent: u64, name: String, kind: NodeKind, nlookup: u64) -> Self {
        Self {
            parent,
            name,
            kind,
            nlookup: AtomicU64::new(nlookup),
        }
    }

    pub fn inc_nlookup(&self) -> u64 {
        self.nlookup.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Decrements by `count`; returns the remaining count, or `None` if the
    /// decrement would underflow (restored in that case).
    pub fn dec_nlookup(&self, count: u64) -> Option<u64> {
        let old = self.nlookup.fetch_sub(count, Ordering::AcqRel);
        if old < count {
            self.nlookup.fetch_add(count, Ordering::Relaxed);
            None
        } else {
            Some(old - count)
        }
    }

    pub fn nlookup(&self) -> u64 {
        self.nlookup.load(Ordering::Relaxed)
    }
}

/// Thread-safe inode table with a `(parent, name)` child index.
///
/// Both maps are `DashMap`s; no operation takes more than one shard lock
/// at a time, and id allocation is a relaxed atomic counter.
pub struct InodeTable {
    entries: DashMap<u64, InodeEntry>,
    children: DashMap<(u64, String), u64>,
    next_ino: AtomicU64,
}

impl InodeTable {
    /// Creates a table with the root directory pre-allocated at ino 1.
    pub fn new() -> Self {
        let entries = DashMap::new();
        entries.insert(
            ROOT_INODE,
            InodeEntry::new(ROOT_INODE, String::new(), NodeKind::Directory, 1),
        );
        Self {
            entries,
            children: DashMap::new(),
            next_ino: AtomicU64::new(ROOT_INODE + 1),
        }
    }

    /// Looks up an entry by inode number.
    pub fn get(&self, ino: u64) -> Option<Ref<'_, u64, InodeEntry>> {
        self.entries.get(&ino)
    }

    /// The node kind, if the inode is known.
    pub fn kind(&self, ino: u64) -> Option<NodeKind> {
        self.entries.get(&ino).map(|e| e.kind)
    }

    /// Looks up a child by name under a parent.
    pub fn child(&self, parent: u64, name: &str) -> Option<u64> {
        self.children
            .get(&(parent, name.to_string()))
            .map(|r| *r.value())
    }

    /// Installs (or finds) a child and increments its lookup count.
    ///
    /// The kind of an existing child is left untouched: identity recorded at
    /// first discovery is authoritative.
    pub fn install(&self, parent: u64, name: &str, kind: NodeKind) -> u64 {
        self.install_inner(parent, name, kind, true)
    }

    /// Installs (or finds) a child without touching the lookup count.
    ///
    /// Used by readdir, which per the FUSE protocol must not affect
    /// reference counting.
    pub fn install_no_lookup(&self, parent: u64, name: &str, kind: NodeKind) -> u64 {
        self.install_inner(parent, name, kind, false)
    }

    fn install_inner(&self, parent: u64, name: &str, kind: NodeKind, count_lookup: bool) -> u64 {
        let key = (parent, name.to_string());
        let ino = *self.children.entry(key).or_insert_with(|| {
            let ino = self.next_ino.fetch_add(1, Ordering::Relaxed);
            self.entries.insert(
                ino,
                InodeEntry::new(parent, name.to_string(), kind, 0),
            );
            ino
        });
        if count_lookup && let Some(entry) = self.entries.get(&ino) {
            entry.inc_nlookup();
        }
        ino
    }

    /// Removes the child mapping for `(parent, name)`.
    ///
    /// The entry itself stays until the kernel forgets it: the kernel may
    /// still present the inode number in later upcalls. Returns the inode
    /// that was unlinked, if any.
    pub fn remove_child(&self, parent: u64, name: &str) -> Option<u64> {
        self.children
            .remove(&(parent, name.to_string()))
            .map(|(_, ino)| ino)
    }

    /// Moves a node to a new parent and name, keeping its inode number.
    ///
    /// The old child mapping is dropped (only if it still points at this
    /// node) and any mapping already present at the target is evicted, as
    /// a rename overwrites the target name. Descendants follow implicitly
    /// because paths are derived from parent links.
    pub fn retarget(&self, ino: u64, new_parent: u64, new_name: &str) {
        let old_key = match self.entries.get(&ino) {
            Some(entry) => (entry.parent, entry.name.clone()),
            None => return,
        };
        self.children
            .remove_if(&old_key, |_, mapped| *mapped == ino);

        if let Some(mut entry) = self.entries.get_mut(&ino) {
            entry.parent = new_parent;
            entry.name = new_name.to_string();
        }
        self.children
            .insert((new_parent, new_name.to_string()), ino);
    }

    /// Decrements the lookup count; evicts the entry when it reaches zero.
    /// Returns whether the inode was evicted. The root is never evicted.
    pub fn forget(&self, ino: u64, nlookup: u64) -> bool {
        if ino == ROOT_INODE {
            return false;
        }
        let evict = match self.entries.get(&ino) {
            Some(entry) => entry.dec_nlookup(nlookup) == Some(0),
            None => false,
        };
        if !evict {
            return false;
        }
        if let Some((_, entry)) = self.entries.remove(&ino) {
            self.children
                .remove_if(&(entry.parent, entry.name), |_, mapped| *mapped == ino);
            true
        } else {
            false
        }
    }

    /// The node's path relative to the mount root, derived by walking
    /// parent links. `None` if a link on the way up has been evicted.
    pub fn path_from_root(&self, ino: u64) -> Option<PathBuf> {
        let mut components = Vec::new();
        let mut current = ino;
        while current != ROOT_INODE {
            let entry = self.entries.get(&current)?;
            components.push(entry.name.clone());
            current = entry.parent;
        }
        let mut path = PathBuf::new();
        for name in components.iter().rev() {
            path.push(name);
        }
        Some(path)
    }

    /// Number of live entries, including the root.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.len() <= 1
    }
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}
