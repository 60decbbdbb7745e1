//! File handle management.
//!
//! A handle is an opaque token manufactured on open/create and presented
//! by the kernel to read/write/release. Handles are single-owner — the
//! kernel guarantees release follows the last transfer — so the table only
//! mediates between the numeric id and the remote file object.

use dashmap::DashMap;
use dashmap::mapref::one::RefMut;
use sshmount_sftp::RemoteFile;
use std::sync::atomic::{AtomicU64, Ordering};

/// An open remote file plus the flags it was opened with.
pub struct OpenHandle {
    pub file: Box<dyn RemoteFile>,
    pub flags: i32,
}

impl std::fmt::Debug for OpenHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenHandle")
            .field("flags", &self.flags)
            .finish_non_exhaustive()
    }
}

/// Thread-safe table of open handles with auto-incrementing ids.
///
/// Ids start at 1; 0 is reserved as the invalid handle.
#[derive(Debug, Default)]
pub struct HandleTable {
    handles: DashMap<u64, OpenHandle>,
    next_id: AtomicU64,
}

impl HandleTable {
    pub fn new() -> Self {
        Self {
            handles: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Inserts a handle and returns its id.
    pub fn insert(&self, handle: OpenHandle) -> u64 {
        loop {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            // Skip 0 on wraparound; an occupied id after 2^64 opens is not
            // a case worth more than this retry.
            if id == 0 || self.handles.contains_key(&id) {
                continue;
            }
            self.handles.insert(id, handle);
            return id;
        }
    }

    /// Mutable access to a handle's remote file.
    pub fn get_mut(&self, id: u64) -> Option<RefMut<'_, u64, OpenHandle>> {
        self.handles.get_mut(&id)
    }

    /// Removes and returns a handle.
    pub fn remove(&self, id: u64) -> Option<OpenHandle> {
        self.handles.remove(&id).map(|(_, h)| h)
    }

    pub fn contains(&self, id: u64) -> bool {
        self.handles.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}
