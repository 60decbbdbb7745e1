//! `[user@]host:[path]` target parsing.

use anyhow::{Result, bail};

/// A parsed mount target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshTarget {
    /// Login user; the local username when omitted.
    pub user: Option<String>,
    pub host: String,
    /// Remote path; relative paths are resolved against the login home by
    /// the server. Empty means the home directory itself.
    pub path: String,
}

impl SshTarget {
    /// Parses `[user@]host:[path]`. The colon is mandatory — it is what
    /// distinguishes a remote target from a local path.
    pub fn parse(input: &str) -> Result<Self> {
        let Some((head, path)) = input.split_once(':') else {
            bail!("invalid target {input:?}: expected [user@]host:[path]");
        };
        let (user, host) = match head.split_once('@') {
            Some((user, host)) => (Some(user.to_string()), host),
            None => (None, head),
        };
        if host.is_empty() {
            bail!("invalid target {input:?}: empty host");
        }
        if let Some(user) = &user
            && user.is_empty()
        {
            bail!("invalid target {input:?}: empty user");
        }
        let path = if path.is_empty() { "." } else { path };
        Ok(Self {
            user,
            host: host.to_string(),
            path: path.to_string(),
        })
    }
}
