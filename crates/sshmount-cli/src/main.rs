#![forbid(unsafe_code)]

//! sshmount: mount a remote directory over SFTP as a local filesystem.

mod auth;
mod signal;
mod target;

use anyhow::{Context, Result};
use clap::Parser;
use fuser::MountOption;
use sshmount_fuse::{MountConfig, SshfsMount};
use sshmount_sftp::{ConnectOptions, SftpError, connect};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use crate::target::SshTarget;

#[derive(Parser)]
#[command(name = "sshmount")]
#[command(author, version, about = "Mount a remote directory over SFTP")]
struct Cli {
    /// Remote target: [user@]host:[path]
    target: String,

    /// Local directory to mount at
    mountpoint: PathBuf,

    /// SSH port
    #[arg(short, long, default_value_t = 22)]
    port: u16,

    /// Private key file to authenticate with
    #[arg(short, long)]
    identity: Option<PathBuf>,

    /// Passphrase for an encrypted identity file
    #[arg(short = 'P', long, env = "SSHMOUNT_PASSPHRASE", hide_env_values = true)]
    passphrase: Option<String>,

    /// Read the password from stdin instead of prompting
    #[arg(long)]
    password_stdin: bool,

    /// Password from the environment (prefer the prompt for interactive use)
    #[arg(long, env = "SSHMOUNT_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Volume label shown by the host OS (defaults to the target)
    #[arg(long)]
    volname: Option<String>,

    /// Attribute cache TTL in seconds
    #[arg(long, default_value_t = 1.0)]
    attr_timeout: f64,

    /// Lookup cache TTL in seconds
    #[arg(long, default_value_t = 1.0)]
    entry_timeout: f64,

    /// Extra mount options, comma separated (passed to the kernel verbatim)
    #[arg(short = 'o', long = "options", value_delimiter = ',')]
    mount_options: Vec<String>,

    /// Network timeout in seconds for SSH operations
    #[arg(long, default_value_t = 30)]
    timeout: u64,

    /// Verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with_writer(std::io::stderr)
        .init();

    let target = SshTarget::parse(&cli.target)?;
    let username = match &target.user {
        Some(user) => user.clone(),
        None => std::env::var("USER").context("no user in target and $USER is unset")?,
    };

    if !cli.mountpoint.is_dir() {
        anyhow::bail!(
            "mountpoint {} is not a directory",
            cli.mountpoint.display()
        );
    }

    let mut opts = ConnectOptions::new(&target.host, &username);
    opts.port = cli.port;
    opts.identity = cli.identity.clone();
    opts.passphrase = cli.passphrase.clone();
    opts.timeout = Duration::from_secs(cli.timeout);
    opts.password = if cli.password_stdin {
        Some(auth::password_from_stdin()?)
    } else {
        cli.password.clone()
    };

    // Agent and identity go first; fall back to an interactive prompt only
    // when they fail and no password was supplied.
    let client = match connect(&opts) {
        Ok(client) => client,
        Err(SftpError::Auth(_)) if opts.password.is_none() && !cli.password_stdin => {
            opts.password = Some(auth::prompt_password(&username, &target.host)?);
            connect(&opts).context("authentication failed")?
        }
        Err(e) => return Err(e).context("failed to establish SSH session"),
    };

    let display_name = cli
        .volname
        .clone()
        .unwrap_or_else(|| format!("{username}@{}:{}", target.host, target.path));
    let config = MountConfig::default()
        .attr_ttl(Duration::from_secs_f64(cli.attr_timeout))
        .entry_ttl(Duration::from_secs_f64(cli.entry_timeout))
        .display_name(display_name);

    let extra: Vec<MountOption> = cli
        .mount_options
        .iter()
        .map(|o| MountOption::CUSTOM(o.clone()))
        .collect();

    let shutdown = signal::install()?;
    let handle = SshfsMount::new()
        .mount(
            Arc::new(client),
            &target.path,
            &cli.mountpoint,
            config,
            &extra,
        )
        .context("mount failed")?;

    eprintln!(
        "mounted {}:{} at {} (interrupt to unmount)",
        target.host,
        target.path,
        cli.mountpoint.display()
    );
    signal::wait(&shutdown);

    let stats = handle.stats();
    handle.unmount();
    tracing::info!(stats = ?stats.snapshot(), "session finished");
    Ok(())
}
