//! Shutdown signal handling.
//!
//! First SIGINT/SIGTERM requests a clean unmount; a second one terminates
//! the process immediately (for when the unmount itself is stuck on a
//! busy mountpoint).

use anyhow::Result;
use signal_hook::consts::TERM_SIGNALS;
use signal_hook::flag;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Installs handlers and returns the shutdown flag.
pub fn install() -> Result<Arc<AtomicBool>> {
    let shutdown = Arc::new(AtomicBool::new(false));
    for &sig in TERM_SIGNALS {
        // Second signal: exit immediately.
        flag::register_conditional_shutdown(sig, 1, Arc::clone(&shutdown))?;
        // First signal: set the flag.
        flag::register(sig, Arc::clone(&shutdown))?;
    }
    Ok(shutdown)
}

/// Blocks until the flag is raised.
pub fn wait(shutdown: &AtomicBool) {
    while !shutdown.load(Ordering::Relaxed) {
        std::thread::sleep(Duration::from_millis(200));
    }
}
