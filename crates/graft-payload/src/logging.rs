//! File-backed tracing for a library with no console of its own.

use std::fs::OpenOptions;
use std::sync::Mutex;

use tracing_subscriber::EnvFilter;

/// Created in the host's working directory, which the launcher pins to
/// the host executable's own directory.
const LOG_FILE: &str = "graft.log";

pub fn init() {
    let Ok(file) = OpenOptions::new().create(true).append(true).open(LOG_FILE) else {
        return;
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .try_init();
}
