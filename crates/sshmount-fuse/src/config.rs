//! Mount configuration.

use std::time::Duration;

/// Default TTL for kernel-cached attributes and lookups.
pub const DEFAULT_TTL: Duration = Duration::from_secs(1);

/// Configuration options for the mounted filesystem.
///
/// The TTLs are handed to the kernel with every entry/attribute reply; the
/// core itself keeps no attribute cache, so these bound how stale the
/// kernel's view may get.
#[derive(Debug, Clone)]
pub struct MountConfig {
    /// How long the kernel may cache attributes.
    pub attr_ttl: Duration,
    /// How long the kernel may cache lookup (dentry) results.
    pub entry_ttl: Duration,
    /// Volume label shown by the host OS.
    pub display_name: String,
}

impl Default for MountConfig {
    fn default() -> Self {
        Self {
            attr_ttl: DEFAULT_TTL,
            entry_ttl: DEFAULT_TTL,
            display_name: "sshmount".to_string(),
        }
    }
}

impl MountConfig {
    #[must_use]
    pub fn attr_ttl(mut self, ttl: Duration) -> Self {
        self.attr_ttl = ttl;
        self
    }

    #[must_use]
    pub fn entry_ttl(mut self, ttl: Duration) -> Self {
        self.entry_ttl = ttl;
        self
    }

    #[must_use]
    pub fn display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }
}
