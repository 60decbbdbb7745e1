//! Mount activity statistics.
//!
//! Lock-free atomic counters recorded on the upcall path and read by the
//! outer harness (logged on unmount). Purely passive: no timers, no
//! background collection.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for one mounted filesystem.
#[derive(Debug, Default)]
pub struct MountStats {
    metadata_ops: AtomicU64,
    read_ops: AtomicU64,
    write_ops: AtomicU64,
    bytes_read: AtomicU64,
    bytes_written: AtomicU64,
    errors: AtomicU64,
    open_handles: AtomicU64,
    inode_count: AtomicU64,
}

/// A point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub metadata_ops: u64,
    pub read_ops: u64,
    pub write_ops: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub errors: u64,
    pub open_handles: u64,
    pub inode_count: u64,
}

impl MountStats {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record_metadata_op(&self) {
        self.metadata_ops.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_read(&self, bytes: u64) {
        self.read_ops.fetch_add(1, Ordering::Relaxed);
        self.bytes_read.fetch_add(bytes, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_write(&self, bytes: u64) {
        self.write_ops.fetch_add(1, Ordering::Relaxed);
        self.bytes_written.fetch_add(bytes, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn handle_opened(&self) {
        self.open_handles.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn handle_closed(&self) {
        // Saturating: a release for a handle we never counted must not wrap.
        let _ = self
            .open_handles
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| v.checked_sub(1));
    }

    #[inline]
    pub fn set_inode_count(&self, count: u64) {
        self.inode_count.store(count, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            metadata_ops: self.metadata_ops.load(Ordering::Relaxed),
            read_ops: self.read_ops.load(Ordering::Relaxed),
            write_ops: self.write_ops.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            open_handles: self.open_handles.load(Ordering::Relaxed),
            inode_count: self.inode_count.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let stats = MountStats::new();
        stats.record_metadata_op();
        stats.record_read(100);
        stats.record_read(50);
        stats.record_write(8);
        stats.record_error();

        let snap = stats.snapshot();
        assert_eq!(snap.metadata_ops, 1);
        assert_eq!(snap.read_ops, 2);
        assert_eq!(snap.bytes_read, 150);
        assert_eq!(snap.write_ops, 1);
        assert_eq!(snap.bytes_written, 8);
        assert_eq!(snap.errors, 1);
    }

    #[test]
    fn open_handle_gauge_never_underflows() {
        let stats = MountStats::new();
        stats.handle_closed();
        assert_eq!(stats.snapshot().open_handles, 0);

        stats.handle_opened();
        stats.handle_opened();
        stats.handle_closed();
        assert_eq!(stats.snapshot().open_handles, 1);
    }
}
