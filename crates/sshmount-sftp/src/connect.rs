//! SSH session establishment.
//!
//! Produces a ready [`Ssh2Client`] from connection options: TCP connect,
//! protocol handshake, then authentication in order of least interaction —
//! ssh-agent, identity file, password.

use crate::error::{SftpError, SftpResult};
use crate::ssh2_client::Ssh2Client;
use std::net::{TcpStream, ToSocketAddrs};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

/// Options for establishing the SSH session.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub host: String,
    pub port: u16,
    pub username: String,
    /// Private key file to try after the agent.
    pub identity: Option<PathBuf>,
    /// Passphrase for an encrypted identity file.
    pub passphrase: Option<String>,
    /// Password to try last. `None` means password auth is skipped.
    pub password: Option<String>,
    /// Applied to the TCP connect and to every blocking libssh2 call.
    pub timeout: Duration,
}

impl ConnectOptions {
    pub fn new(host: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: 22,
            username: username.into(),
            identity: None,
            passphrase: None,
            password: None,
            timeout: Duration::from_secs(30),
        }
    }
}

/// Establishes an authenticated session and opens its SFTP channel.
pub fn connect(opts: &ConnectOptions) -> SftpResult<Ssh2Client> {
    let addr = (opts.host.as_str(), opts.port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| {
            SftpError::Transport(format!("could not resolve {}:{}", opts.host, opts.port))
        })?;

    debug!(%addr, "connecting");
    let stream = TcpStream::connect_timeout(&addr, opts.timeout)?;

    let mut session = ssh2::Session::new().map_err(SftpError::from)?;
    // u32 milliseconds; 0 would mean "block forever".
    session.set_timeout(opts.timeout.as_millis().min(u128::from(u32::MAX)) as u32);
    session.set_tcp_stream(stream);
    session.handshake().map_err(SftpError::from)?;

    authenticate(&session, opts)?;

    let sftp = session.sftp().map_err(SftpError::from)?;
    info!(host = %opts.host, user = %opts.username, "sftp session established");
    Ok(Ssh2Client::new(session, sftp))
}

fn authenticate(session: &ssh2::Session, opts: &ConnectOptions) -> SftpResult<()> {
    // Agent first: free when it works, silent when it doesn't.
    if let Err(e) = session.userauth_agent(&opts.username) {
        debug!(error = %e, "agent authentication failed");
    }
    if session.authenticated() {
        return Ok(());
    }

    if let Some(identity) = &opts.identity {
        if let Err(e) = session.userauth_pubkey_file(
            &opts.username,
            None,
            identity,
            opts.passphrase.as_deref(),
        ) {
            debug!(identity = %identity.display(), error = %e, "identity authentication failed");
        }
        if session.authenticated() {
            return Ok(());
        }
    }

    if let Some(password) = &opts.password {
        if let Err(e) = session.userauth_password(&opts.username, password) {
            debug!(error = %e, "password authentication failed");
        }
        if session.authenticated() {
            return Ok(());
        }
    }

    Err(SftpError::Auth(format!(
        "all authentication methods failed for {}@{}",
        opts.username, opts.host
    )))
}
