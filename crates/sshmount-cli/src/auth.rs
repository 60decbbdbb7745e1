//! Password acquisition.

use anyhow::{Context, Result, bail};
use std::io::{self, BufRead, Write};

/// Prompt for the SSH password with echo disabled.
pub fn prompt_password(user: &str, host: &str) -> Result<String> {
    eprint!("{user}@{host}'s password: ");
    io::stderr().flush()?;
    let password = rpassword::read_password().context("failed to read password")?;
    if password.is_empty() {
        bail!("password cannot be empty");
    }
    Ok(password)
}

/// Read one line of password from stdin (for scripted use).
pub fn password_from_stdin() -> Result<String> {
    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .context("failed to read password from stdin")?;
    let password = line.trim_end_matches(['\r', '\n']).to_string();
    if password.is_empty() {
        bail!("password cannot be empty");
    }
    Ok(password)
}
